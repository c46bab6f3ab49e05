//! Lock request options and acquisition results.

use crate::error::{LeaseError, Result};
use crate::instance::InstanceId;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

const MAX_TTL_DAYS: i64 = 365 * 100;

/// Per-call options for [`crate::locks::LockManager::acquire_lock`].
#[derive(Debug, Clone, PartialEq)]
pub struct LockOptions {
    /// Lease duration written as `expires_at = now + ttl`.
    pub ttl: Duration,

    /// How often the owner touches `heartbeat_at` while holding the lease.
    pub heartbeat_interval: Duration,

    /// Upper bound on the whole retry loop. Zero still makes one attempt.
    pub acquire_timeout: Duration,

    /// Stored on the row for observability.
    pub metadata: Option<Value>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            acquire_timeout: Duration::from_secs(5),
            metadata: None,
        }
    }
}

impl LockOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reject requests the manager cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(LeaseError::InvalidLockRequest(
                "ttl must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(LeaseError::InvalidLockRequest(
                "heartbeat interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// TTL as a chrono duration, clamped so `now + ttl` cannot overflow.
    pub(crate) fn ttl_chrono(&self) -> chrono::Duration {
        let ceiling = chrono::Duration::days(MAX_TTL_DAYS);
        chrono::Duration::from_std(self.ttl)
            .map(|ttl| ttl.min(ceiling))
            .unwrap_or(ceiling)
    }
}

/// How a successful acquisition came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireKind {
    /// A new row was inserted.
    Created,
    /// This instance already owned the row and pushed its expiry forward.
    Renewed,
    /// The row had expired and was swapped to this instance.
    TakenOver,
}

impl fmt::Display for AcquireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireKind::Created => write!(f, "created"),
            AcquireKind::Renewed => write!(f, "renewed"),
            AcquireKind::TakenOver => write!(f, "taken_over"),
        }
    }
}

/// Outcome of an acquisition attempt.
///
/// Failing to get the lock is routine under several replicas, so it is a
/// value rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Acquired {
        owner: InstanceId,
        expires_at: DateTime<Utc>,
        kind: AcquireKind,
    },
    NotAcquired {
        /// Attempts made before the acquire timeout ran out.
        attempts: u32,
        /// The last store error seen, if the loop hit any.
        last_error: Option<String>,
    },
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Acquisition::Acquired { .. })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Acquisition::Acquired { expires_at, .. } => Some(*expires_at),
            Acquisition::NotAcquired { .. } => None,
        }
    }

    /// Human-readable reason for a failed acquisition.
    pub fn error(&self) -> Option<String> {
        match self {
            Acquisition::Acquired { .. } => None,
            Acquisition::NotAcquired {
                attempts,
                last_error: Some(e),
            } => Some(format!(
                "lock acquisition timeout after {} attempts (last error: {})",
                attempts, e
            )),
            Acquisition::NotAcquired { attempts, .. } => Some(format!(
                "lock acquisition timeout after {} attempts",
                attempts
            )),
        }
    }
}
