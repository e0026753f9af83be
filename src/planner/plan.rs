//! Deployment plan types and construction.
//!
//! A plan is the dry-run form of a reconcile: one action per orphaned record
//! (deletes first, dependents before their dependencies) followed by one
//! action per declared node in topological order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::config::ResourceKind;
use crate::graph::{DependencyGraph, order_by_dependencies, reverse_order};
use crate::state::{DeploymentState, StateRecord};

use super::diff::{DiffDetail, DiffEngine, DiffType};
use super::executor::DriftEntry;
use super::resolve::Resolver;

/// A complete deployment plan.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Manifest hash this plan is based on.
    pub manifest_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
    /// Records that disagree with the provider (refresh only).
    pub conflicts: Vec<DriftEntry>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// What will happen.
    pub action: DiffType,
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider id of the existing resource, if any.
    pub provider_id: Option<String>,
    /// Why this action was chosen.
    pub reason: String,
    /// Field-level changes.
    pub details: Vec<DiffDetail>,
    /// Logical names this node waits for.
    pub dependencies: Vec<String>,
}

/// Returns the orphaned records of `state`, dependents first.
#[must_use]
pub fn orphans_in_delete_order<'a>(
    graph: &DependencyGraph,
    state: &'a DeploymentState,
) -> Vec<&'a StateRecord> {
    let orphans: Vec<&StateRecord> = state
        .records
        .values()
        .filter(|r| graph.index_of(&r.name).is_none())
        .collect();
    delete_order(&orphans)
}

/// Orders records so that every record comes before the records it
/// depends on.
#[must_use]
pub fn delete_order<'a>(records: &[&'a StateRecord]) -> Vec<&'a StateRecord> {
    let items: Vec<(&str, &[String])> = records
        .iter()
        .map(|r| (r.name.as_str(), r.dependencies.as_slice()))
        .collect();
    reverse_order(&order_by_dependencies(&items))
        .into_iter()
        .map(|i| records[i])
        .collect()
}

impl DeploymentPlan {
    /// Builds a plan from the graph and the last-applied state.
    ///
    /// References to outputs of nodes that will be created or replaced in
    /// this run resolve to `(known after apply)`.
    #[must_use]
    pub fn build(
        graph: &DependencyGraph,
        state: &DeploymentState,
        manifest_hash: &str,
        engine: &DiffEngine,
    ) -> Self {
        let mut actions = Vec::new();

        for record in orphans_in_delete_order(graph, state) {
            actions.push(PlannedAction {
                action: DiffType::Delete,
                name: record.name.clone(),
                kind: record.kind,
                provider_id: Some(record.provider_id.clone()),
                reason: String::from("removed from manifest"),
                details: vec![],
                dependencies: record.dependencies.clone(),
            });
        }

        let mut pending: HashSet<String> = HashSet::new();
        for index in graph.topological_order() {
            let decl = graph.node(index);
            let record = state.get_record(&decl.name);

            let resolved = Resolver::preview(&state.records, &pending).resolve(&decl.name, &decl.properties);
            let (properties, unknown) = match resolved {
                Ok(resolved) => (resolved.properties, resolved.unknown),
                Err(_) => Default::default(),
            };

            let diff = engine.diff_node(&decl.name, decl.kind, &properties, &unknown, record);
            // Dependents of a first-time lookup only learn its outputs at apply.
            let fresh_lookup = diff.diff_type == DiffType::Read && record.is_none();
            if fresh_lookup || matches!(diff.diff_type, DiffType::Create | DiffType::Replace) {
                pending.insert(decl.name.clone());
            }

            actions.push(PlannedAction {
                action: diff.diff_type,
                name: decl.name.clone(),
                kind: decl.kind,
                provider_id: record.map(|r| r.provider_id.clone()),
                reason: reason_for(diff.diff_type, &diff.details, &unknown),
                details: diff.details,
                dependencies: graph.dependency_names(index),
            });
        }

        Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions,
            conflicts: vec![],
        }
    }

    /// Returns true if applying the plan would change anything at the
    /// provider. Lookups alone do not count.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action.is_change())
    }

    /// Number of actions of the given type.
    #[must_use]
    pub fn count(&self, action: DiffType) -> usize {
        self.actions.iter().filter(|a| a.action == action).count()
    }

    /// Returns true if applying the plan would call the provider at all,
    /// lookups included.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.actions.iter().any(|a| a.action != DiffType::NoChange)
    }

    /// Actions that call the provider: changes and lookups.
    pub fn actionable(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.action != DiffType::NoChange)
    }

    /// One-line summary, e.g. `2 to create, 1 to update, 0 to replace, 1 to delete`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to replace, {} to delete, {} to read, {} unchanged",
            self.count(DiffType::Create),
            self.count(DiffType::Update),
            self.count(DiffType::Replace),
            self.count(DiffType::Delete),
            self.count(DiffType::Read),
            self.count(DiffType::NoChange),
        )
    }
}

fn reason_for(action: DiffType, details: &[DiffDetail], unknown: &BTreeSet<String>) -> String {
    match action {
        DiffType::Create => String::from("not yet provisioned"),
        DiffType::NoChange => String::from("up to date"),
        DiffType::Delete => String::from("removed from manifest"),
        DiffType::Read => String::from("read-only lookup"),
        DiffType::Replace => {
            let forced: Vec<&str> = details
                .iter()
                .filter(|d| d.forces_replace)
                .map(|d| d.field.as_str())
                .collect();
            format!("{} cannot change in place", forced.join(", "))
        }
        DiffType::Update if !unknown.is_empty() => {
            format!("depends on values known after apply ({})", join(unknown))
        }
        DiffType::Update => {
            let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
            format!("{} changed", fields.join(", "))
        }
    }
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            DiffType::Create => format!("Create {} '{}'", self.kind, self.name),
            DiffType::Update => format!("Update {} '{}'", self.kind, self.name),
            DiffType::Replace => format!("Replace {} '{}'", self.kind, self.name),
            DiffType::Delete => format!("Delete {} '{}'", self.kind, self.name),
            DiffType::Read => format!("Read {} '{}'", self.kind, self.name),
            DiffType::NoChange => format!("No change for '{}'", self.name),
        }
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.action.symbol(), self.kind, self.name)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_work() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan: {}", self.summary())?;
        for action in self.actionable() {
            writeln!(f, "  {action}")?;
        }

        if !self.conflicts.is_empty() {
            writeln!(f, "\nState conflicts:")?;
            for conflict in &self.conflicts {
                writeln!(f, "  - {}: {}", conflict.name, conflict.status)?;
            }
        }

        Ok(())
    }
}
