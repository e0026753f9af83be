//! Run-level state locking.
//!
//! Mutating commands hold the store lock for the duration of a run so that
//! two operators cannot reconcile the same stack at once. Locks expire after
//! [`LOCK_EXPIRY_SECS`] so that a crashed run does not block forever; a
//! live run keeps its lock fresh with a heartbeat every
//! [`LOCK_HEARTBEAT_SECS`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, StackError, StateError};

use super::store::StateStore;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Interval between lock refreshes while a run holds the lock.
pub const LOCK_HEARTBEAT_SECS: u64 = 60;

/// Information about a state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock for `holder`, expiring after [`LOCK_EXPIRY_SECS`].
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Moves the expiry to [`LOCK_EXPIRY_SECS`] from now.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// A held run lock. Release it with [`RunLock::release`] once the run ends.
///
/// While held, a background task refreshes the lock so that a run longer
/// than [`LOCK_EXPIRY_SECS`] is not taken over. Dropping the guard stops the
/// heartbeat but leaves the lock to expire.
#[derive(Debug)]
pub struct RunLock {
    info: LockInfo,
    stop: Option<oneshot::Sender<()>>,
    heartbeat: JoinHandle<()>,
}

impl RunLock {
    /// Acquires the store lock for this process.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LockedByOther` if another holder has an unexpired
    /// lock, or a store error.
    pub async fn acquire(store: Arc<dyn StateStore>) -> Result<Self> {
        Self::acquire_with_heartbeat(store, Duration::from_secs(LOCK_HEARTBEAT_SECS)).await
    }

    /// Acquires the store lock and refreshes it every `every`.
    ///
    /// # Errors
    ///
    /// Same as [`RunLock::acquire`].
    pub async fn acquire_with_heartbeat(store: Arc<dyn StateStore>, every: Duration) -> Result<Self> {
        let info = store.acquire_lock(&generate_holder_id()).await?;
        info!(lock_id = %info.lock_id, holder = %info.holder, "Run lock acquired");
        let (stop, stopped) = oneshot::channel();
        let heartbeat = tokio::spawn(heartbeat(store, info.lock_id.clone(), every, stopped));
        Ok(Self {
            info,
            stop: Some(stop),
            heartbeat,
        })
    }

    /// Stops the heartbeat and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lock file cannot be removed.
    pub async fn release(mut self, store: &dyn StateStore) -> Result<()> {
        // Let an in-progress refresh finish so it cannot rewrite the lock
        // after it is released.
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.heartbeat).await {
            warn!("Lock heartbeat ended abnormally: {e}");
        }
        store.release_lock(&self.info.lock_id).await
    }

    /// Gets the lock info as acquired.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

async fn heartbeat(
    store: Arc<dyn StateStore>,
    lock_id: String,
    every: Duration,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut stopped => return,
            _ = ticker.tick() => {}
        }
        match store.refresh_lock(&lock_id).await {
            Ok(lock) => debug!(lock_id = %lock.lock_id, expires_at = %lock.expires_at, "Run lock refreshed"),
            Err(StackError::State(StateError::LockLost { .. })) => {
                error!(lock_id = %lock_id, "Run lock was lost; another run may now hold the stack");
                return;
            }
            Err(e) => warn!(lock_id = %lock_id, "Could not refresh run lock: {e}"),
        }
    }
}

/// Generates a holder identifier for the current process:
/// `hostname-pid-uuid8`.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let uuid = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalStateStore;
    use tempfile::TempDir;

    #[test]
    fn test_lock_creation() {
        let lock = LockInfo::new("ci-runner");
        assert_eq!(lock.holder, "ci-runner");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
    }

    #[test]
    fn test_expired_lock() {
        let mut lock = LockInfo::new("ci-runner");
        lock.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();
        assert_ne!(id1, id2);

        let pid = std::process::id().to_string();
        assert!(id1.contains(&pid));
        assert_eq!(id1.rsplit('-').next().map(str::len), Some(8));
    }

    #[test]
    fn test_refresh_extends_expiry() {
        let mut lock = LockInfo::new("ci-runner");
        lock.expires_at = Utc::now() - chrono::Duration::seconds(1);
        lock.refresh();
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
    }

    #[tokio::test]
    async fn test_run_lock_round_trip() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(temp.path()));

        let lock = RunLock::acquire(store.clone()).await.unwrap();
        assert!(store.is_locked().await.unwrap());
        assert!(RunLock::acquire(store.clone()).await.is_err());

        lock.release(&*store).await.unwrap();
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_lock_alive() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(temp.path()));

        let lock = RunLock::acquire_with_heartbeat(store.clone(), Duration::from_millis(20))
            .await
            .unwrap();
        let first = lock.info().expires_at;

        tokio::time::sleep(Duration::from_millis(120)).await;
        let current = store.get_lock_info().await.unwrap().unwrap();
        assert_eq!(current.lock_id, lock.info().lock_id);
        assert!(current.expires_at > first);

        lock.release(&*store).await.unwrap();
        assert!(store.get_lock_info().await.unwrap().is_none());
    }
}
