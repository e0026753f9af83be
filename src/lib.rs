// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Test code asserts with unwrap and panics on unexpected variants.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackwright
//!
//! A declarative infrastructure reconciliation engine.
//!
//! ## Overview
//!
//! Resources are declared in YAML manifests. Stackwright:
//!
//! - Validates each declaration against a per-kind property schema
//! - Builds a dependency graph from `${resource.attribute}` references and
//!   explicit `depends_on` lists, rejecting cycles before anything runs
//! - Diffs the resolved properties against the last-applied state and
//!   classifies every node as create, update, replace, no-op or delete
//! - Walks the graph in parallel, creating dependencies before dependents
//!   and deleting dependents before dependencies
//! - Persists state after every node so an interrupted run can resume
//!
//! ## Modules
//!
//! - [`config`]: Manifest loading, schemas and validation
//! - [`graph`]: Dependency graph and orderings
//! - [`planner`]: Reference resolution, diffing, plans and single-node execution
//! - [`reconciler`]: The scheduling loop for apply, destroy and drift checks
//! - [`provider`]: The provider boundary (REST and simulated backends)
//! - [`state`]: State storage backends (local, S3) and run locking
//! - [`context`]: Explicit run context
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: web
//!   stack: prod
//!
//! resources:
//!   - name: vpc
//!     type: network
//!     properties:
//!       cidr_block: 10.0.0.0/16
//!
//!   - name: public-1
//!     type: subnet
//!     properties:
//!       network_id: ${vpc.id}
//!       cidr_block: 10.0.1.0/24
//!
//! outputs:
//!   subnet_id: ${public-1.id}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, DeclarationLoader, Manifest, ManifestValidator};
pub use context::{CancellationHandle, RunContext};
pub use error::{Result, StackError};
pub use graph::DependencyGraph;
pub use planner::{DeploymentPlan, DiffEngine, NodeExecutor};
pub use provider::{HttpProvider, MemoryProvider, Provider};
pub use reconciler::{DriftReport, NodeStatus, Reconciler, RunReport};
pub use state::{DeploymentState, LocalStateStore, S3StateStore, StateStore};
