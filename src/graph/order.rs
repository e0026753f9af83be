//! Topological ordering.
//!
//! Kahn's algorithm with the ready set kept in a `BTreeSet`, so among nodes
//! whose dependencies are all satisfied the lowest index goes first. With
//! indices assigned in declaration order, ties break by insertion order.

use std::collections::{BTreeSet, HashMap};

/// Orders nodes so that every node comes after all of its dependencies.
///
/// `dependencies[n]` lists the nodes `n` depends on. Nodes on a cycle never
/// become ready and are left out; callers that cannot rule out cycles should
/// compare the result length with the input length.
#[must_use]
pub fn topological_order(dependencies: &[Vec<usize>]) -> Vec<usize> {
    let n = dependencies.len();
    let mut remaining: Vec<usize> = vec![0; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (node, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            if dep < n {
                remaining[node] += 1;
                dependents[dep].push(node);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &dependent in &dependents[node] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    order
}

/// Reverses a topological order: dependents before their dependencies.
#[must_use]
pub fn reverse_order(order: &[usize]) -> Vec<usize> {
    order.iter().rev().copied().collect()
}

/// Orders named items by the names they depend on.
///
/// Used for state records, whose stored dependency lists may name records
/// that no longer exist; such edges are ignored. Items caught in a cycle are
/// appended in input order so that every item appears exactly once.
#[must_use]
pub fn order_by_dependencies(items: &[(&str, &[String])]) -> Vec<usize> {
    let positions: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (*name, i))
        .collect();

    let dependencies: Vec<Vec<usize>> = items
        .iter()
        .map(|(_, deps)| {
            let mut resolved: Vec<usize> = deps
                .iter()
                .filter_map(|d| positions.get(d.as_str()).copied())
                .collect();
            resolved.sort_unstable();
            resolved.dedup();
            resolved
        })
        .collect();

    let mut order = topological_order(&dependencies);
    if order.len() < items.len() {
        let placed: BTreeSet<usize> = order.iter().copied().collect();
        order.extend((0..items.len()).filter(|i| !placed.contains(i)));
    }
    order
}
