//! State types.
//!
//! A [`DeploymentState`] is the engine's memory of what it last applied: one
//! [`StateRecord`] per provisioned resource, the resolved stack outputs and a
//! bounded run history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ResourceKind;
use crate::error::StateError;
use crate::provider::{Outputs, Properties};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete state document for one project/stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
    /// Records keyed by logical name.
    #[serde(default)]
    pub records: BTreeMap<String, StateRecord>,
    /// Resolved stack outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// What was last applied for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Resolved properties that were applied.
    pub properties: Properties,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: Outputs,
    /// SHA-256 of the canonical property snapshot.
    pub hash: String,
    /// Logical names this resource depended on when applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Manifest hash at the time of the run.
    pub manifest_hash: String,
    /// Number of nodes applied.
    pub applied: usize,
    /// Number of nodes failed.
    pub failed: usize,
    /// Whether every node was applied.
    pub success: bool,
}

/// Types of runs recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Reconcile towards the manifest.
    Apply,
    /// Delete everything.
    Destroy,
}

impl DeploymentState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(project: &str, stack: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            stack: stack.to_string(),
            records: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Checks that this state belongs to `project/stack` and uses a known
    /// format version.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` or `StackMismatch`.
    pub fn check_identity(&self, project: &str, stack: &str) -> Result<(), StateError> {
        if self.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            });
        }
        if self.project != project || self.stack != stack {
            return Err(StateError::StackMismatch {
                expected: format!("{project}/{stack}"),
                found: format!("{}/{}", self.project, self.stack),
            });
        }
        Ok(())
    }

    /// Gets a record by logical name.
    #[must_use]
    pub fn get_record(&self, name: &str) -> Option<&StateRecord> {
        self.records.get(name)
    }

    /// Adds or replaces a record.
    pub fn set_record(&mut self, record: StateRecord) {
        self.records.insert(record.name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by logical name.
    pub fn remove_record(&mut self, name: &str) -> Option<StateRecord> {
        let result = self.records.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns all record names, sorted.
    #[must_use]
    pub fn record_names(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl StateRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        name: &str,
        kind: ResourceKind,
        provider_id: &str,
        properties: Properties,
        outputs: Outputs,
        hash: String,
        dependencies: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            kind,
            provider_id: provider_id.to_string(),
            properties,
            outputs,
            hash,
            dependencies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Keeps the original creation time of `previous`.
    #[must_use]
    pub fn created_like(mut self, previous: &Self) -> Self {
        self.created_at = previous.created_at;
        self
    }
}

impl RunHistoryEntry {
    /// Creates a history entry stamped with the current time.
    #[must_use]
    pub fn new(operation: RunOperation, manifest_hash: &str, applied: usize, failed: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            manifest_hash: manifest_hash.to_string(),
            applied,
            failed,
            success: failed == 0,
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}
