//! Planning module for reconciliation.
//!
//! Resolves references, diffs resolved properties against state records,
//! builds dry-run plans and issues the provider calls for a single node.

mod diff;
mod executor;
mod plan;
mod resolve;

pub use diff::{DiffDetail, DiffEngine, DiffType, ResourceDiff};
pub use executor::{DriftEntry, DriftStatus, NodeExecutor, NodeTask};
pub use plan::{DeploymentPlan, PlannedAction, delete_order, orphans_in_delete_order};
pub use resolve::{OutputSource, Resolved, Resolver, UNKNOWN_VALUE};
