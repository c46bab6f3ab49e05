//! Scoped lease ownership and the `with_lock` executor.

use super::manager::LockManager;
use super::options::{AcquireKind, Acquisition, LockOptions};
use crate::error::{LeaseError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use tracing::warn;

/// RAII guard for a held lease.
///
/// Call [`LeaseGuard::release`] to release and observe the result. If the
/// guard is dropped instead (early return, panic, a cancelled future), the
/// heartbeat is stopped at once and the release is spawned on the current
/// Tokio runtime. Without a runtime the row is left to expire.
#[derive(Debug)]
#[must_use = "dropping the guard releases the lease"]
pub struct LeaseGuard {
    manager: LockManager,
    lock_name: String,
    expires_at: DateTime<Utc>,
    kind: AcquireKind,
    released: bool,
}

impl LeaseGuard {
    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Expiry written when the lease was (re)acquired. Heartbeats do not move it.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn kind(&self) -> AcquireKind {
        self.kind
    }

    /// Release the lease now. Returns whether a row was deleted.
    pub async fn release(mut self) -> Result<bool> {
        let result = self.manager.release_lock(&self.lock_name).await;
        self.released = true;
        result
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.manager.stop_heartbeat(&self.lock_name);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.manager.clone();
                let lock_name = std::mem::take(&mut self.lock_name);
                handle.spawn(async move {
                    if let Err(e) = manager.release_lock(&lock_name).await {
                        warn!(lock = %lock_name, error = %e, "Failed to release dropped lease");
                    }
                });
            }
            Err(_) => {
                warn!(
                    lock = %self.lock_name,
                    expires_at = %self.expires_at,
                    "No runtime to release dropped lease, leaving it to expire"
                );
            }
        }
    }
}

impl LockManager {
    /// Acquire `lock_name` and wrap the lease in a guard.
    ///
    /// `Ok(None)` when the lock could not be obtained within the acquire timeout.
    pub async fn lock(&self, lock_name: &str, options: &LockOptions) -> Result<Option<LeaseGuard>> {
        match self.acquire_lock(lock_name, options).await? {
            Acquisition::Acquired {
                expires_at, kind, ..
            } => Ok(Some(LeaseGuard {
                manager: self.clone(),
                lock_name: lock_name.to_string(),
                expires_at,
                kind,
                released: false,
            })),
            Acquisition::NotAcquired { .. } => Ok(None),
        }
    }

    /// Run `operation` while holding `lock_name`.
    ///
    /// Returns `Ok(None)` without calling `operation` if the lock was not
    /// obtained. Otherwise the lease is released before this returns, whether
    /// `operation` succeeded or failed; its error is passed through. If the
    /// returned future is dropped mid-operation the guard's `Drop` releases.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        lock_name: &str,
        options: &LockOptions,
        operation: F,
    ) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<LeaseError>,
    {
        let Some(guard) = self.lock(lock_name, options).await? else {
            return Ok(None);
        };

        let outcome = operation().await;

        if let Err(e) = guard.release().await {
            warn!(lock = lock_name, error = %e, "Failed to release lock after operation");
        }
        outcome.map(Some)
    }
}
