//! State store trait.
//!
//! A store holds one [`DeploymentState`] document and one lock per
//! project/stack. The reconciler reads the document at run start and writes
//! it after every node outcome.

use async_trait::async_trait;
use std::sync::Arc;

use super::lock::LockInfo;
use super::types::DeploymentState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state document.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>>;

    /// Replaces the state document.
    async fn save(&self, state: &DeploymentState) -> Result<()>;

    /// Deletes the state document and any lock.
    async fn delete(&self) -> Result<()>;

    /// Checks if a state document exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the lock for `holder`. An expired lock is taken over.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Pushes the expiry of lock `lock_id` forward. Fails with
    /// `StateError::LockLost` if the stored lock is a different one.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` matches the current one.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information, expired or not.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if an unexpired lock is held.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        (**self).load().await
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(lock_id).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
