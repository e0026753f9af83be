//! Persistent state.
//!
//! Records what was last applied for each resource, plus stack outputs, run
//! history and a run-level lock. Local files and S3 are supported.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LOCK_HEARTBEAT_SECS, LockInfo, RunLock, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    DeploymentState, MAX_HISTORY, RunHistoryEntry, RunOperation, STATE_VERSION, StateRecord,
};

use std::sync::Arc;

use crate::config::{StateBackend, StateConfig};
use crate::error::{ConfigError, Result};

/// Builds the state store selected by the manifest for `project/stack`.
///
/// # Errors
///
/// Returns an error if the s3 backend has no bucket or the local directory
/// cannot be determined.
pub async fn create_store(
    config: &StateConfig,
    project: &str,
    stack: &str,
) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StateBackend::Local => Ok(Arc::new(LocalStateStore::for_stack(
            config.path.as_deref(),
            project,
            stack,
        )?)),
        StateBackend::S3 => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                ConfigError::validation(
                    "S3 bucket name is required when using S3 backend",
                    "state.bucket",
                )
            })?;
            Ok(Arc::new(
                S3StateStore::new(
                    bucket,
                    config.prefix.as_deref(),
                    config.region.as_deref(),
                    project,
                    stack,
                )
                .await,
            ))
        }
    }
}
