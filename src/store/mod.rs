//! Lock store: the single shared table of lease rows.
//!
//! The store is the only state replicas share. It provides exactly two atomic
//! primitives the lock manager builds on:
//! - row creation guarded by a uniqueness constraint on `lock_name`
//! - conditional updates and deletes (owner-filtered, or compare-and-swap on
//!   the previously observed `expires_at`)
//!
//! No call spans more than one lock name, so there is no cross-lock atomicity
//! to get wrong.

mod sqlite;

#[cfg(test)]
mod tests;

pub use sqlite::SqliteLockStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One lease row, keyed by `lock_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Name of the protected resource. Unique across the table.
    pub lock_name: String,

    /// Instance currently holding the lease.
    pub owner_instance_id: String,

    /// When the current owner took the lease (reset on takeover only).
    pub acquired_at: DateTime<Utc>,

    /// After this instant the lease is abandoned and may be taken over.
    pub expires_at: DateTime<Utc>,

    /// Most recent liveness signal from the owner.
    pub heartbeat_at: DateTime<Utc>,

    /// Owner-supplied payload for observability. Never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LockRecord {
    /// A fresh lease for `owner` starting at `now`.
    pub fn new_lease(
        lock_name: &str,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            lock_name: lock_name.to_string(),
            owner_instance_id: owner.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
            heartbeat_at: now,
            metadata,
        }
    }

    /// Whether the lease has passed its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner_instance_id == owner
    }

    /// Signed time left on the lease; negative once expired.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at.signed_duration_since(now)
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = Utc::now();
        let remaining = self.time_to_expiry(now);
        write!(
            f,
            "{} (owner: {}, held: {}, heartbeat: {} ago, {})",
            self.lock_name,
            self.owner_instance_id,
            format_duration(now.signed_duration_since(self.acquired_at)),
            format_duration(now.signed_duration_since(self.heartbeat_at)),
            if remaining < Duration::zero() {
                "EXPIRED".to_string()
            } else {
                format!("expires in {}", format_duration(remaining))
            }
        )
    }
}

/// New expiry, heartbeat and metadata written when an owner renews its lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRenewal {
    pub expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

/// Result of attempting to create a row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The row was created; the caller holds the lease.
    Inserted,
    /// A row with that name already exists.
    Conflict,
}

/// Shared table of lease rows.
///
/// Implementations must make `insert` fail with [`InsertOutcome::Conflict`]
/// on a duplicate name and must apply every conditional write atomically.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create a row; `Conflict` if the name is taken.
    async fn insert(&self, record: &LockRecord) -> Result<InsertOutcome>;

    /// Read the row for `lock_name`, if any.
    async fn get(&self, lock_name: &str) -> Result<Option<LockRecord>>;

    /// Update expiry, heartbeat and metadata of a row still owned by `owner`.
    /// Returns the updated row, or `None` if no owned row matched.
    async fn renew(
        &self,
        lock_name: &str,
        owner: &str,
        renewal: &LeaseRenewal,
    ) -> Result<Option<LockRecord>>;

    /// Overwrite the row with `record` only if its `expires_at` still equals
    /// `observed_expires_at`. Returns whether the swap happened.
    async fn take_over(
        &self,
        observed_expires_at: DateTime<Utc>,
        record: &LockRecord,
    ) -> Result<bool>;

    /// Set `heartbeat_at` on the row owned by `owner`. Returns rows affected.
    async fn touch_heartbeat(&self, lock_name: &str, owner: &str, at: DateTime<Utc>)
    -> Result<u64>;

    /// Delete the row only if owned by `owner`. Returns rows deleted.
    async fn delete_owned(&self, lock_name: &str, owner: &str) -> Result<u64>;

    /// Delete every row owned by `owner`. Returns rows deleted.
    async fn delete_all_owned(&self, owner: &str) -> Result<u64>;

    /// Delete every row with `expires_at < now`, whoever owns it.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Delete the row unconditionally.
    async fn delete(&self, lock_name: &str) -> Result<u64>;

    /// Rows with `expires_at > now`, oldest lease first.
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<LockRecord>>;
}

/// Current time at the precision rows are persisted with (milliseconds).
///
/// Takeover compares `expires_at` for equality, so every timestamp the
/// manager writes must survive a round trip through the store unchanged.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Format a duration as a short human-readable string.
pub fn format_duration(d: Duration) -> String {
    let d = d.abs();
    let seconds = d.num_seconds();
    let minutes = d.num_minutes();
    let hours = d.num_hours();
    let days = d.num_days();

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
