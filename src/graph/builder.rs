//! Dependency graph construction.
//!
//! Nodes are declarations in insertion order. Edges come from references
//! found anywhere in a declaration's properties (including template parts)
//! and from explicit `depends_on` entries. Edge lists are kept sorted and
//! deduplicated, so the same declarations always yield the same graph.

use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

use crate::config::ResourceDeclaration;
use crate::error::{CycleError, ParseError, Result};

use super::order;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Acyclic dependency graph over resource declarations.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceDeclaration>,
    positions: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Builds the graph for a set of declarations.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::UnknownReference` or `ParseError::UnknownAttribute`
    /// if a reference or `depends_on` entry cannot be satisfied, and
    /// `CycleError` if the edges form a cycle. Reference errors are reported
    /// before cycles.
    pub fn build(declarations: &[ResourceDeclaration]) -> Result<Self> {
        let positions: HashMap<String, usize> = declarations
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();

        let mut dependencies = Vec::with_capacity(declarations.len());
        for decl in declarations {
            let mut deps = Vec::new();

            for reference in decl.references() {
                let target = *positions.get(&reference.resource).ok_or_else(|| {
                    ParseError::UnknownReference {
                        resource: decl.name.clone(),
                        target: reference.resource.clone(),
                    }
                })?;
                let target_kind = declarations[target].kind;
                if !target_kind.exports(&reference.attribute) {
                    return Err(ParseError::UnknownAttribute {
                        resource: decl.name.clone(),
                        target: reference.resource.clone(),
                        attribute: reference.attribute.clone(),
                    }
                    .into());
                }
                deps.push(target);
            }

            for name in &decl.depends_on {
                let target = *positions
                    .get(name)
                    .ok_or_else(|| ParseError::UnknownReference {
                        resource: decl.name.clone(),
                        target: name.clone(),
                    })?;
                deps.push(target);
            }

            deps.sort_unstable();
            deps.dedup();
            dependencies.push(deps);
        }

        find_cycle(declarations, &dependencies)?;

        let mut dependents = vec![Vec::new(); declarations.len()];
        for (node, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let graph = Self {
            nodes: declarations.to_vec(),
            positions,
            dependencies,
            dependents,
        };
        debug!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            "Dependency graph built"
        );
        Ok(graph)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All declarations, in insertion order.
    #[must_use]
    pub fn declarations(&self) -> &[ResourceDeclaration] {
        &self.nodes
    }

    /// Declaration at `index`.
    #[must_use]
    pub fn node(&self, index: usize) -> &ResourceDeclaration {
        &self.nodes[index]
    }

    /// Logical name of the node at `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        &self.nodes[index].name
    }

    /// Index of the node with the given logical name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Direct dependencies of a node, sorted.
    #[must_use]
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    /// Names of the direct dependencies of a node.
    #[must_use]
    pub fn dependency_names(&self, index: usize) -> Vec<String> {
        self.dependencies[index]
            .iter()
            .map(|&d| self.nodes[d].name.clone())
            .collect()
    }

    /// Direct dependents of a node, sorted.
    #[must_use]
    pub fn direct_dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Every node that transitively depends on `index`.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents[index].iter().copied().collect();

        while let Some(node) = queue.pop_front() {
            if seen.insert(node) {
                queue.extend(self.dependents[node].iter().copied());
            }
        }
        seen
    }

    /// All edges as `(dependent, dependency)` pairs, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(usize, usize)> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(node, deps)| deps.iter().map(move |&d| (node, d)))
            .collect()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    /// Visitation order: dependencies first, ties broken by insertion order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<usize> {
        order::topological_order(&self.dependencies)
    }

    /// Destroy order: dependents first.
    #[must_use]
    pub fn reverse_order(&self) -> Vec<usize> {
        order::reverse_order(&self.topological_order())
    }
}

/// Depth-first search with three marks. Reaching a node that is still on the
/// current path closes a cycle, which is reported from that node around to
/// itself.
fn find_cycle(
    declarations: &[ResourceDeclaration],
    dependencies: &[Vec<usize>],
) -> std::result::Result<(), CycleError> {
    let mut marks = vec![Mark::Unvisited; declarations.len()];

    for start in 0..declarations.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::OnPath;
        let mut path: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(&(node, next_child)) = path.last() {
            let Some(&child) = dependencies[node].get(next_child) else {
                marks[node] = Mark::Done;
                path.pop();
                continue;
            };
            if let Some(top) = path.last_mut() {
                top.1 += 1;
            }

            match marks[child] {
                Mark::Unvisited => {
                    marks[child] = Mark::OnPath;
                    path.push((child, 0));
                }
                Mark::OnPath => {
                    let from = path.iter().position(|&(n, _)| n == child).unwrap_or(0);
                    let mut cycle: Vec<String> = path[from..]
                        .iter()
                        .map(|&(n, _)| declarations[n].name.clone())
                        .collect();
                    cycle.push(declarations[child].name.clone());
                    return Err(CycleError { cycle });
                }
                Mark::Done => {}
            }
        }
    }

    Ok(())
}
