//! Lease acquisition, release and inspection.

use super::backoff::RetryPolicy;
use super::heartbeat::HeartbeatRegistry;
use super::options::{AcquireKind, Acquisition, LockOptions};
use crate::error::{LeaseError, Result};
use crate::instance::InstanceId;
use crate::store::{InsertOutcome, LeaseRenewal, LockRecord, LockStore, timestamp_now};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Distributed lock manager for one process.
///
/// Created once at startup and passed to whatever needs it; clones share the
/// same instance id and heartbeat timers.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: Arc<dyn LockStore>,
    instance_id: InstanceId,
    heartbeats: HeartbeatRegistry,
    retry: RetryPolicy,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, instance_id: InstanceId) -> Self {
        Self::with_retry_policy(store, instance_id, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        store: Arc<dyn LockStore>,
        instance_id: InstanceId,
        retry: RetryPolicy,
    ) -> Self {
        let heartbeats = HeartbeatRegistry::new(Arc::clone(&store), instance_id.clone());
        Self {
            inner: Arc::new(ManagerInner {
                store,
                instance_id,
                heartbeats,
                retry,
            }),
        }
    }

    /// Identifier this process claims leases under.
    pub fn instance_id(&self) -> &InstanceId {
        &self.inner.instance_id
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    /// Try to take the lease on `lock_name`, retrying until
    /// `options.acquire_timeout` elapses.
    ///
    /// Re-entrant: if this instance already owns the row, its expiry is
    /// pushed to `now + ttl`. An expired row held by anyone else is taken
    /// over with a compare-and-swap on the observed expiry.
    ///
    /// Contention and timeout are reported as [`Acquisition::NotAcquired`].
    /// Store errors are logged and retried. Only a malformed request is an
    /// `Err`.
    pub async fn acquire_lock(&self, lock_name: &str, options: &LockOptions) -> Result<Acquisition> {
        validate_lock_name(lock_name)?;
        options.validate()?;
        if options.heartbeat_interval >= options.ttl {
            warn!(
                lock = lock_name,
                ttl_ms = options.ttl.as_millis() as u64,
                heartbeat_ms = options.heartbeat_interval.as_millis() as u64,
                "Heartbeat interval is not shorter than the lease TTL"
            );
        }

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut last_error: Option<String> = None;

        loop {
            attempts += 1;
            match self.try_acquire(lock_name, options).await {
                Ok(Some(acquisition)) => return Ok(acquisition),
                Ok(None) => {}
                Err(e) => {
                    warn!(lock = lock_name, attempt = attempts, error = %e, "Lock store error during acquire");
                    last_error = Some(e.to_string());
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= options.acquire_timeout {
                break;
            }
            let remaining = options.acquire_timeout - elapsed;
            tokio::time::sleep(self.inner.retry.delay_for(attempts).min(remaining)).await;
        }

        debug!(
            lock = lock_name,
            attempts,
            timeout_ms = options.acquire_timeout.as_millis() as u64,
            "Lock acquisition timed out"
        );
        Ok(Acquisition::NotAcquired {
            attempts,
            last_error,
        })
    }

    /// One pass of the acquire algorithm. `Ok(None)` means retry.
    async fn try_acquire(&self, lock_name: &str, options: &LockOptions) -> Result<Option<Acquisition>> {
        let store = &self.inner.store;
        let owner = self.inner.instance_id.as_str();

        if let Err(e) = self.cleanup_expired_locks().await {
            debug!(lock = lock_name, error = %e, "Opportunistic cleanup failed");
        }

        let now = timestamp_now();
        let claim = LockRecord::new_lease(
            lock_name,
            owner,
            now,
            options.ttl_chrono(),
            options.metadata.clone(),
        );

        if store.insert(&claim).await? == InsertOutcome::Inserted {
            self.inner.heartbeats.start(lock_name, options.heartbeat_interval);
            info!(lock = lock_name, instance = owner, expires_at = %claim.expires_at, "Lock acquired");
            return Ok(Some(self.acquired(claim.expires_at, AcquireKind::Created)));
        }

        let Some(existing) = store.get(lock_name).await? else {
            // Released or reaped between the insert and the read.
            return Ok(None);
        };

        if existing.is_owned_by(owner) {
            let renewal = LeaseRenewal {
                expires_at: claim.expires_at,
                heartbeat_at: now,
                metadata: options.metadata.clone(),
            };
            return match store.renew(lock_name, owner, &renewal).await? {
                Some(renewed) => {
                    self.inner
                        .heartbeats
                        .ensure_running(lock_name, options.heartbeat_interval);
                    debug!(lock = lock_name, expires_at = %renewed.expires_at, "Lock renewed");
                    Ok(Some(self.acquired(renewed.expires_at, AcquireKind::Renewed)))
                }
                None => Ok(None),
            };
        }

        if existing.is_expired_at(now) {
            if store.take_over(existing.expires_at, &claim).await? {
                self.inner.heartbeats.start(lock_name, options.heartbeat_interval);
                info!(
                    lock = lock_name,
                    instance = owner,
                    previous_owner = %existing.owner_instance_id,
                    "Expired lock taken over"
                );
                return Ok(Some(self.acquired(claim.expires_at, AcquireKind::TakenOver)));
            }
            debug!(lock = lock_name, "Lost takeover race");
            return Ok(None);
        }

        debug!(lock = lock_name, holder = %existing.owner_instance_id, "Lock held elsewhere");
        Ok(None)
    }

    fn acquired(&self, expires_at: chrono::DateTime<chrono::Utc>, kind: AcquireKind) -> Acquisition {
        Acquisition::Acquired {
            owner: self.inner.instance_id.clone(),
            expires_at,
            kind,
        }
    }

    /// Stop the heartbeat, then delete the row if this instance still owns it.
    /// Returns whether a row was deleted.
    pub async fn release_lock(&self, lock_name: &str) -> Result<bool> {
        self.inner.heartbeats.stop(lock_name);
        let deleted = self
            .inner
            .store
            .delete_owned(lock_name, self.inner.instance_id.as_str())
            .await?;

        if deleted > 0 {
            info!(lock = lock_name, "Lock released");
        } else {
            debug!(lock = lock_name, "Release found no owned row");
        }
        Ok(deleted > 0)
    }

    /// Whether this instance owns an unexpired row for `lock_name`.
    pub async fn has_lock(&self, lock_name: &str) -> Result<bool> {
        let now = timestamp_now();
        Ok(self
            .inner
            .store
            .get(lock_name)
            .await?
            .is_some_and(|r| r.is_owned_by(self.inner.instance_id.as_str()) && r.expires_at > now))
    }

    /// Snapshot of the row for `lock_name`, whoever owns it.
    pub async fn get_lock_info(&self, lock_name: &str) -> Result<Option<LockRecord>> {
        self.inner.store.get(lock_name).await
    }

    /// Delete every expired row regardless of owner. Safe to run from any
    /// number of instances at once.
    pub async fn cleanup_expired_locks(&self) -> Result<u64> {
        let deleted = self.inner.store.delete_expired(timestamp_now()).await?;
        if deleted > 0 {
            info!(count = deleted, "Cleaned up expired locks");
        }
        Ok(deleted)
    }

    /// Stop every heartbeat, then delete every row this instance owns.
    pub async fn release_all_locks(&self) -> Result<u64> {
        let stopped = self.inner.heartbeats.stop_all();
        let deleted = self
            .inner
            .store
            .delete_all_owned(self.inner.instance_id.as_str())
            .await?;
        info!(
            instance = %self.inner.instance_id,
            count = deleted,
            heartbeats = stopped,
            "Released all locks"
        );
        Ok(deleted)
    }

    /// Every unexpired row, oldest lease first.
    pub async fn list_active_locks(&self) -> Result<Vec<LockRecord>> {
        self.inner.store.list_active(timestamp_now()).await
    }

    /// Delete the row for `lock_name` whoever owns it.
    ///
    /// For operators clearing a lease held by a process that is known to be
    /// gone. A live holder is not notified and will lose its lease silently.
    pub async fn force_release(&self, lock_name: &str) -> Result<bool> {
        validate_lock_name(lock_name)?;
        self.inner.heartbeats.stop(lock_name);
        let deleted = self.inner.store.delete(lock_name).await?;
        if deleted > 0 {
            warn!(lock = lock_name, instance = %self.inner.instance_id, "Lock force-released");
        }
        Ok(deleted > 0)
    }

    /// Whether a heartbeat timer is running for `lock_name` in this process.
    pub fn is_heartbeat_active(&self, lock_name: &str) -> bool {
        self.inner.heartbeats.is_running(lock_name)
    }

    /// Lock names with a running heartbeat in this process.
    pub fn active_heartbeats(&self) -> Vec<String> {
        self.inner.heartbeats.active()
    }

    pub(crate) fn stop_heartbeat(&self, lock_name: &str) -> bool {
        self.inner.heartbeats.stop(lock_name)
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("instance_id", &self.inner.instance_id)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

fn validate_lock_name(lock_name: &str) -> Result<()> {
    if lock_name.trim().is_empty() {
        return Err(LeaseError::InvalidLockRequest(
            "lock name must not be empty".to_string(),
        ));
    }
    Ok(())
}
