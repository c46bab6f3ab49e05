//! Config struct definition and default implementation.

use super::types::*;
use crate::locks::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for a leasehold process.
///
/// This struct represents the contents of `leasehold.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Store settings
    // =========================================================================
    /// SQLite file shared by every replica.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // =========================================================================
    // Protected job settings
    // =========================================================================
    /// Whether the protected job is scheduled at startup.
    #[serde(default = "default_true")]
    pub job_enabled: bool,

    /// Seconds between protected job runs (5 to 300).
    #[serde(default = "default_job_interval_secs")]
    pub job_interval_secs: u64,

    /// Lock name dedicated to the protected job.
    #[serde(default = "default_job_lock_name")]
    pub job_lock_name: String,

    /// Command run as the protected job body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_command: Option<String>,

    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Lease TTL for the job lock. Heartbeats do not extend it.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Seconds between heartbeats while the job lock is held.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long a tick waits for the job lock before skipping.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Seconds between sweeps of expired lock rows.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Backoff between acquire attempts.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// How long shutdown waits for an in-flight job run before cancelling it.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            job_enabled: default_true(),
            job_interval_secs: default_job_interval_secs(),
            job_lock_name: default_job_lock_name(),
            job_command: None,
            lock_ttl_secs: default_lock_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            reaper_interval_secs: default_reaper_interval_secs(),
            retry: RetryPolicy::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}
