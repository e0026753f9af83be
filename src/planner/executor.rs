//! Provider calls for a single node.
//!
//! The executor never touches [`DeploymentState`](crate::state::DeploymentState).
//! It takes what it needs by value, talks to the provider and returns the
//! record to persist. The reconciler folds results into state.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ResourceKind;
use crate::context::RunContext;
use crate::error::{ProviderError, ReconcileError, Result, StackError};
use crate::provider::{Properties, Provider, ProviderResource};
use crate::state::StateRecord;

use super::diff::DiffType;

/// Everything needed to apply one node.
#[derive(Debug, Clone)]
pub struct NodeTask {
    /// Logical name.
    pub name: String,
    /// Declared kind.
    pub kind: ResourceKind,
    /// Classified action.
    pub action: DiffType,
    /// Resolved properties.
    pub properties: Properties,
    /// Hash of `properties`.
    pub hash: String,
    /// Logical names of the node's dependencies.
    pub dependencies: Vec<String>,
    /// Record from the previous run, if any.
    pub record: Option<StateRecord>,
}

/// Result of comparing a record with what the provider reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftStatus {
    /// The provider agrees with the record.
    InSync,
    /// The provider no longer has the resource.
    Missing,
    /// The provider reports different values for these properties.
    Changed {
        /// Differing property names.
        fields: Vec<String>,
    },
    /// The provider could not be asked.
    Error {
        /// Provider error.
        message: String,
    },
}

/// Drift check result for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftEntry {
    /// Logical name.
    pub name: String,
    /// Recorded kind.
    pub kind: ResourceKind,
    /// Recorded provider id.
    pub provider_id: String,
    /// Outcome.
    #[serde(flatten)]
    pub status: DriftStatus,
}

impl DriftEntry {
    /// Returns true if the record can no longer be trusted.
    #[must_use]
    pub const fn is_drifted(&self) -> bool {
        matches!(self.status, DriftStatus::Missing | DriftStatus::Changed { .. })
    }

    /// Describes the conflict, if any.
    #[must_use]
    pub fn conflict_message(&self) -> Option<String> {
        match &self.status {
            DriftStatus::Missing => Some(format!(
                "{} '{}' no longer exists at the provider",
                self.kind, self.provider_id
            )),
            DriftStatus::Changed { fields } => Some(format!(
                "properties changed outside stackwright: {}",
                fields.join(", ")
            )),
            DriftStatus::InSync | DriftStatus::Error { .. } => None,
        }
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InSync => write!(f, "in sync"),
            Self::Missing => write!(f, "missing"),
            Self::Changed { fields } => write!(f, "changed ({})", fields.join(", ")),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Issues provider calls for nodes.
#[derive(Clone)]
pub struct NodeExecutor {
    provider: Arc<dyn Provider>,
    ctx: RunContext,
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("provider", &self.provider.name())
            .field("stack", &self.ctx.stack_id())
            .finish()
    }
}

impl NodeExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, ctx: RunContext) -> Self {
        Self { provider, ctx }
    }

    /// Applies one node and returns the record to persist.
    ///
    /// When the run refreshes, the existing record is checked first and a
    /// disagreement fails the node without any mutating call. Lookups are
    /// answered fresh every time and never checked.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict` on refresh disagreement, the provider error of
    /// the failing call, or `ReplaceIncomplete` when a replacement deleted
    /// the old resource but could not create the new one.
    pub async fn apply(&self, task: NodeTask) -> Result<StateRecord> {
        if self.ctx.refresh && task.action != DiffType::Read {
            if let Some(record) = &task.record {
                self.verify(record).await?;
            }
        }

        match (task.action, &task.record) {
            (DiffType::NoChange, Some(record)) => {
                debug!("{} is up to date", task.name);
                Ok(record.clone())
            }
            (DiffType::Create, _) => {
                let resource = self
                    .provider
                    .create(&self.ctx, task.kind, &task.name, &task.properties)
                    .await
                    .inspect_err(|e| error!("Failed to create {}: {e}", task.name))?;
                info!("Created {} {} ({})", task.kind, task.name, resource.id);
                Ok(Self::record_for(task, resource, None))
            }
            (DiffType::Update, Some(record)) => {
                let resource = self
                    .provider
                    .update(&self.ctx, task.kind, &record.provider_id, &task.properties)
                    .await
                    .inspect_err(|e| error!("Failed to update {}: {e}", task.name))?;
                info!("Updated {} {} ({})", task.kind, task.name, resource.id);
                let previous = record.clone();
                Ok(Self::record_for(task, resource, Some(&previous)))
            }
            (DiffType::Replace, Some(record)) => {
                self.provider
                    .delete(&self.ctx, record.kind, &record.provider_id)
                    .await
                    .inspect_err(|e| error!("Failed to delete {} for replacement: {e}", task.name))?;
                info!("Deleted {} ({}) for replacement", task.name, record.provider_id);

                let resource = self
                    .provider
                    .create(&self.ctx, task.kind, &task.name, &task.properties)
                    .await
                    .map_err(|e| {
                        error!("Failed to recreate {}: {e}", task.name);
                        ReconcileError::ReplaceIncomplete {
                            resource: task.name.clone(),
                            deleted_id: record.provider_id.clone(),
                            message: e.to_string(),
                        }
                    })?;
                info!("Replaced {} {} ({})", task.kind, task.name, resource.id);
                Ok(Self::record_for(task, resource, None))
            }
            (DiffType::Read, record) => {
                let resource = self
                    .provider
                    .lookup(&self.ctx, task.kind, &task.name, &task.properties)
                    .await
                    .inspect_err(|e| error!("Lookup {} failed: {e}", task.name))?
                    .ok_or_else(|| ProviderError::LookupFailed {
                        kind: task.kind.to_string(),
                        name: task.name.clone(),
                        message: String::from("nothing matches"),
                    })?;
                debug!("Lookup {} resolved to {}", task.name, resource.id);
                let previous = record.clone();
                Ok(Self::record_for(task, resource, previous.as_ref()))
            }
            (action, record) => Err(StackError::internal(format!(
                "Cannot {action} '{}' (record present: {})",
                task.name,
                record.is_some()
            ))),
        }
    }

    /// Deletes the resource behind a record. Lookup records are only
    /// forgotten; the provider is not called.
    ///
    /// # Errors
    ///
    /// Returns the provider error if the delete is rejected.
    pub async fn delete(&self, record: &StateRecord) -> Result<()> {
        if record.kind.is_lookup() {
            debug!("Forgetting lookup {} ({})", record.name, record.provider_id);
            return Ok(());
        }
        self.provider
            .delete(&self.ctx, record.kind, &record.provider_id)
            .await
            .inspect_err(|e| error!("Failed to delete {}: {e}", record.name))?;
        info!("Deleted {} {} ({})", record.kind, record.name, record.provider_id);
        Ok(())
    }

    /// Reads a record's resource and compares it with the record.
    pub async fn check(&self, record: &StateRecord) -> DriftEntry {
        let status = match self
            .provider
            .read(&self.ctx, record.kind, &record.provider_id)
            .await
        {
            Ok(None) => DriftStatus::Missing,
            Ok(Some(observed)) => {
                let fields = changed_fields(&record.properties, &observed.properties);
                if fields.is_empty() {
                    DriftStatus::InSync
                } else {
                    DriftStatus::Changed { fields }
                }
            }
            Err(e) => DriftStatus::Error {
                message: e.to_string(),
            },
        };

        if !matches!(status, DriftStatus::InSync) {
            warn!("{} ({}): {status}", record.name, record.provider_id);
        }

        DriftEntry {
            name: record.name.clone(),
            kind: record.kind,
            provider_id: record.provider_id.clone(),
            status,
        }
    }

    async fn verify(&self, record: &StateRecord) -> Result<()> {
        let entry = self.check(record).await;
        if let DriftStatus::Error { message } = entry.status {
            return Err(StackError::conflict(
                &record.name,
                format!("could not read resource: {message}"),
            ));
        }
        match entry.conflict_message() {
            Some(message) => Err(StackError::conflict(&record.name, message)),
            None => Ok(()),
        }
    }

    fn record_for(task: NodeTask, resource: ProviderResource, previous: Option<&StateRecord>) -> StateRecord {
        let record = StateRecord::new(
            &task.name,
            task.kind,
            &resource.id,
            task.properties,
            resource.outputs,
            task.hash,
            task.dependencies,
        );
        match previous {
            Some(previous) => record.created_like(previous),
            None => record,
        }
    }
}

/// Properties in `recorded` whose observed value differs.
///
/// Only keys the record knows about are compared; providers may report
/// extra computed properties.
fn changed_fields(recorded: &Properties, observed: &Properties) -> Vec<String> {
    recorded
        .iter()
        .filter(|(key, value)| observed.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, Outputs};
    use mockall::predicate::eq;
    use serde_json::json;

    fn props() -> Properties {
        Properties::from([("cidr_block".to_string(), json!("10.0.0.0/16"))])
    }

    fn record() -> StateRecord {
        StateRecord::new(
            "vpc",
            ResourceKind::Network,
            "network-0001",
            props(),
            Outputs::new(),
            String::from("h1"),
            vec![],
        )
    }

    fn task(action: DiffType, record: Option<StateRecord>) -> NodeTask {
        NodeTask {
            name: String::from("vpc"),
            kind: ResourceKind::Network,
            action,
            properties: props(),
            hash: String::from("h2"),
            dependencies: vec![],
            record,
        }
    }

    fn resource(id: &str) -> ProviderResource {
        ProviderResource {
            id: id.to_string(),
            properties: props(),
            outputs: Outputs::from([("id".to_string(), json!(id))]),
        }
    }

    #[tokio::test]
    async fn test_replace_deletes_then_creates() {
        let mut mock = MockProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_delete()
            .with(mockall::predicate::always(), eq(ResourceKind::Network), eq("network-0001"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        mock.expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(resource("network-0002")));

        let executor = NodeExecutor::new(Arc::new(mock), RunContext::new("demo", "dev"));
        let out = executor
            .apply(task(DiffType::Replace, Some(record())))
            .await
            .unwrap();
        assert_eq!(out.provider_id, "network-0002");
        assert_eq!(out.hash, "h2");
    }

    #[tokio::test]
    async fn test_replace_reports_deleted_resource_when_create_fails() {
        let mut mock = MockProvider::new();
        mock.expect_delete().times(1).returning(|_, _, _| Ok(()));
        mock.expect_create()
            .times(1)
            .returning(|_, _, _, _| Err(ProviderError::api_error(500, "boom")));

        let executor = NodeExecutor::new(Arc::new(mock), RunContext::new("demo", "dev"));
        let err = executor
            .apply(task(DiffType::Replace, Some(record())))
            .await
            .unwrap_err();
        match err {
            StackError::Reconcile(ReconcileError::ReplaceIncomplete { resource, deleted_id, .. }) => {
                assert_eq!(resource, "vpc");
                assert_eq!(deleted_id, "network-0001");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_records_result_and_skips_refresh() {
        let mut mock = MockProvider::new();
        mock.expect_read().never();
        mock.expect_lookup()
            .withf(|_, kind, name, _| *kind == ResourceKind::Image && name == "ami")
            .times(1)
            .returning(|_, _, _, _| Ok(Some(resource("ami-0002"))));

        let mut lookup = task(DiffType::Read, Some(record()));
        lookup.name = String::from("ami");
        lookup.kind = ResourceKind::Image;

        let ctx = RunContext::new("demo", "dev").with_refresh(true);
        let executor = NodeExecutor::new(Arc::new(mock), ctx);
        let out = executor.apply(lookup).await.unwrap();
        assert_eq!(out.provider_id, "ami-0002");
        assert_eq!(out.kind, ResourceKind::Image);
    }

    #[tokio::test]
    async fn test_lookup_without_match_fails() {
        let mut mock = MockProvider::new();
        mock.expect_lookup().returning(|_, _, _, _| Ok(None));

        let mut lookup = task(DiffType::Read, None);
        lookup.kind = ResourceKind::Image;
        let executor = NodeExecutor::new(Arc::new(mock), RunContext::new("demo", "dev"));
        let err = executor.apply(lookup).await.unwrap_err();
        assert!(matches!(err, StackError::Provider(ProviderError::LookupFailed { .. })));
    }

    #[tokio::test]
    async fn test_deleting_lookup_record_skips_provider() {
        let mut mock = MockProvider::new();
        mock.expect_delete().never();

        let mut forgotten = record();
        forgotten.kind = ResourceKind::Image;
        let executor = NodeExecutor::new(Arc::new(mock), RunContext::new("demo", "dev"));
        executor.delete(&forgotten).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_keeps_creation_time() {
        let mut mock = MockProvider::new();
        mock.expect_update()
            .times(1)
            .returning(|_, _, id, _| Ok(resource(id)));

        let previous = record();
        let executor = NodeExecutor::new(Arc::new(mock), RunContext::new("demo", "dev"));
        let out = executor
            .apply(task(DiffType::Update, Some(previous.clone())))
            .await
            .unwrap();
        assert_eq!(out.created_at, previous.created_at);
        assert_eq!(out.provider_id, "network-0001");
    }

    #[tokio::test]
    async fn test_refresh_conflict_on_missing_resource() {
        let mut mock = MockProvider::new();
        mock.expect_read().times(1).returning(|_, _, _| Ok(None));
        mock.expect_update().never();

        let ctx = RunContext::new("demo", "dev").with_refresh(true);
        let executor = NodeExecutor::new(Arc::new(mock), ctx);
        let err = executor
            .apply(task(DiffType::Update, Some(record())))
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::StateConflict { resource, .. } if resource == "vpc"));
    }

    #[tokio::test]
    async fn test_check_reports_changed_fields() {
        let mut mock = MockProvider::new();
        mock.expect_read().returning(|_, _, _| {
            Ok(Some(ProviderResource {
                id: String::from("network-0001"),
                properties: Properties::from([
                    ("cidr_block".to_string(), json!("10.9.0.0/16")),
                    ("computed".to_string(), json!(true)),
                ]),
                outputs: Outputs::new(),
            }))
        });

        let executor = NodeExecutor::new(Arc::new(mock), RunContext::new("demo", "dev"));
        let entry = executor.check(&record()).await;
        assert_eq!(
            entry.status,
            DriftStatus::Changed {
                fields: vec!["cidr_block".to_string()]
            }
        );
        assert!(entry.is_drifted());
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let mut mock = MockProvider::new();
        mock.expect_create()
            .returning(|_, _, _, _| Err(ProviderError::api_error(500, "boom")));

        let executor = NodeExecutor::new(Arc::new(mock), RunContext::new("demo", "dev"));
        let err = executor.apply(task(DiffType::Create, None)).await.unwrap_err();
        assert!(matches!(err, StackError::Provider(ProviderError::ApiRequestFailed { status: 500, .. })));
    }
}
