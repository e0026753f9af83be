//! Provider trait and the types that cross it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ResourceKind;
use crate::context::RunContext;
use crate::error::ProviderError;

/// Resolved property values sent to the provider.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Output attributes reported by the provider.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A resource as the provider sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResource {
    /// Provider-assigned identifier.
    pub id: String,
    /// Properties the provider currently holds.
    #[serde(default)]
    pub properties: Properties,
    /// Output attributes.
    #[serde(default)]
    pub outputs: Outputs,
}

/// Provider operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOperation {
    /// Create a resource.
    Create,
    /// Read a resource.
    Read,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Find an existing resource without managing it.
    Lookup,
}

impl std::fmt::Display for ProviderOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Read => write!(f, "read"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Lookup => write!(f, "lookup"),
        }
    }
}

/// Boundary to the system that actually holds resources.
///
/// Implementations must be safe to call concurrently; the reconciler issues
/// calls for independent nodes in parallel. None of these calls is retried by
/// the reconciler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource and returns its id, properties and outputs.
    async fn create(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        name: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource>;

    /// Reads a resource. Returns `Ok(None)` if it no longer exists.
    async fn read(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        id: &str,
    ) -> ProviderResult<Option<ProviderResource>>;

    /// Updates a resource in place.
    async fn update(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        id: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource>;

    /// Deletes a resource. Deleting a resource that is already gone succeeds.
    async fn delete(&self, ctx: &RunContext, kind: ResourceKind, id: &str) -> ProviderResult<()>;

    /// Finds an existing resource matching `query` for the lookup `name`.
    ///
    /// Never changes anything. Returns `Ok(None)` if nothing matches.
    async fn lookup(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        name: &str,
        query: &Properties,
    ) -> ProviderResult<Option<ProviderResource>>;

    /// Returns the provider name.
    fn name(&self) -> &'static str;
}
