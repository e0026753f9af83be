//! Error types for the stackwright reconciliation engine.
//!
//! Errors fall into two groups. Fatal errors (`ParseError`, `CycleError`,
//! configuration and state store failures) stop a run before any resource is
//! touched. Per-node errors (`ProviderError`, `StateConflict`) are caught by
//! the reconciler, recorded against the failing node and propagated only to
//! that node's dependents.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stackwright.
#[derive(Debug, Error)]
pub enum StackError {
    /// A declaration could not be loaded.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// Configuration-related errors (files, settings, environment).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Persisted state disagrees with the provider.
    #[error("State conflict for '{resource}': {message}")]
    StateConflict {
        /// Logical name of the conflicting resource.
        resource: String,
        /// What the provider reported.
        message: String,
    },

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading declarations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The manifest is not valid YAML or does not match the document layout.
    #[error("Failed to parse manifest: {message}")]
    Syntax {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A resource uses a type tag that is not known.
    #[error("Resource '{resource}' has unknown type '{type_tag}'")]
    UnknownType {
        /// Logical name of the resource.
        resource: String,
        /// The unrecognised type tag.
        type_tag: String,
    },

    /// Two resources share a logical name.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A required property is missing.
    #[error("Resource '{resource}' is missing required property '{property}'")]
    MissingProperty {
        /// Logical name of the resource.
        resource: String,
        /// Name of the missing property.
        property: String,
    },

    /// A property is not part of the resource type's schema.
    #[error("Resource '{resource}' has unknown property '{property}'")]
    UnknownProperty {
        /// Logical name of the resource.
        resource: String,
        /// Name of the unexpected property.
        property: String,
    },

    /// A literal property value has the wrong shape.
    #[error("Resource '{resource}' property '{property}': expected {expected}")]
    InvalidValue {
        /// Logical name of the resource.
        resource: String,
        /// Name of the property.
        property: String,
        /// Description of the expected shape.
        expected: String,
    },

    /// A `${...}` expression is malformed.
    #[error("Invalid reference expression '{expression}': {reason}")]
    InvalidReference {
        /// The offending expression.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A reference or `depends_on` entry names an undeclared resource.
    #[error("Resource '{resource}' refers to undeclared resource '{target}'")]
    UnknownReference {
        /// Logical name of the referencing resource.
        resource: String,
        /// The missing target.
        target: String,
    },

    /// A reference names an attribute the target does not export.
    #[error("Resource '{resource}' refers to '{target}.{attribute}', but '{target}' exports no such attribute")]
    UnknownAttribute {
        /// Logical name of the referencing resource.
        resource: String,
        /// The referenced resource.
        target: String,
        /// The unknown attribute.
        attribute: String,
    },

    /// A logical name does not follow naming rules.
    #[error("Invalid resource name '{name}': must be lowercase alphanumeric with single hyphens, starting with a letter")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A type is declared in the wrong section: lookup-only types belong
    /// under `lookups`, every other type under `resources`.
    #[error("Resource '{resource}': type '{type_tag}' {reason}")]
    WrongSection {
        /// Logical name of the declaration.
        resource: String,
        /// The type tag.
        type_tag: String,
        /// Which section the type belongs to.
        reason: String,
    },

    /// The file set does not carry exactly one project header.
    #[error("Manifest set must declare `project` exactly once (found {found})")]
    ProjectHeader {
        /// How many project headers were found.
        found: usize,
    },
}

/// The dependency graph is not acyclic.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
pub struct CycleError {
    /// Node sequence of the cycle; the first node is repeated at the end.
    pub cycle: Vec<String>,
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Settings validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written or removed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// The lock this run held was released or taken over.
    #[error("State lock {lock_id} is no longer held by this run")]
    LockLost {
        /// Identifier of the lost lock.
        lock_id: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// The state belongs to a different project or stack.
    #[error("State belongs to {found}, not {expected}")]
    StackMismatch {
        /// The project/stack being run.
        expected: String,
        /// The project/stack recorded in state.
        found: String,
    },
}

/// Provider API errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("Provider request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Resource not found.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Provider identifier.
        id: String,
    },

    /// The provider refused the operation because of a conflicting resource.
    #[error("Provider conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A read-only lookup matched nothing, or more than one resource.
    #[error("{kind} lookup '{name}' failed: {message}")]
    LookupFailed {
        /// Resource kind.
        kind: String,
        /// Logical name of the lookup.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// The provider rejected the operation.
    #[error("{operation} {kind} '{name}' rejected: {message}")]
    Rejected {
        /// Operation that was attempted.
        operation: String,
        /// Resource kind.
        kind: String,
        /// Logical name.
        name: String,
        /// Reason given by the provider.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A property references an output that is not available.
    #[error("Cannot resolve '{target}.{attribute}' for '{resource}': {reason}")]
    Unresolved {
        /// Resource whose property failed to resolve.
        resource: String,
        /// Referenced resource.
        target: String,
        /// Referenced attribute.
        attribute: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A dependency of this node failed.
    #[error("Dependency '{dependency}' failed")]
    DependencyFailed {
        /// Name of the failed dependency.
        dependency: String,
    },

    /// A resource that depends on this one could not be deleted.
    #[error("Dependent '{dependent}' could not be deleted")]
    DependentFailed {
        /// Name of the dependent whose delete failed.
        dependent: String,
    },

    /// The old resource of a replacement was deleted, but the new one could
    /// not be created.
    #[error("'{resource}' was deleted ({deleted_id}) but could not be recreated: {message}")]
    ReplaceIncomplete {
        /// Logical name.
        resource: String,
        /// Provider id of the deleted resource.
        deleted_id: String,
        /// Error from the create call.
        message: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for stackwright operations.
pub type Result<T> = std::result::Result<T, StackError>;

impl StackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a state conflict error.
    #[must_use]
    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateConflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error aborts a run before provisioning.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Provider(_) | Self::StateConflict { .. } | Self::Reconcile(_)
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }
}

impl ParseError {
    /// Creates a syntax error with an optional location.
    #[must_use]
    pub fn syntax(message: impl Into<String>, location: Option<String>) -> Self {
        Self::Syntax {
            message: message.into(),
            location,
        }
    }

    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(
        resource: impl Into<String>,
        property: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            resource: resource.into(),
            property: property.into(),
            expected: expected.into(),
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Returns true if a repeated request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }

    /// Returns the wait the provider asked for before retrying, if any.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
