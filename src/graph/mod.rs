//! Dependency graph over resource declarations.
//!
//! The builder collects reference and `depends_on` edges, rejects unknown
//! targets and cycles, and exposes the orderings the reconciler visits nodes in.

mod builder;
mod order;

pub use builder::DependencyGraph;
pub use order::{order_by_dependencies, reverse_order, topological_order};
