//! Configuration constants and defaults for leasehold.

use std::ops::RangeInclusive;

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "leasehold.yaml";

/// Overrides `database_path`.
pub const DATABASE_ENV: &str = "LEASEHOLD_DATABASE";

/// `false` disables the protected job.
pub const JOB_ENABLED_ENV: &str = "LEASEHOLD_JOB_ENABLED";

/// Overrides `job_interval_secs` when inside [`JOB_INTERVAL_RANGE`].
pub const JOB_INTERVAL_ENV: &str = "LEASEHOLD_JOB_INTERVAL_SECONDS";

/// Overrides `job_command`.
pub const JOB_COMMAND_ENV: &str = "LEASEHOLD_JOB_COMMAND";

/// Allowed protected job interval, in seconds.
pub const JOB_INTERVAL_RANGE: RangeInclusive<u64> = 5..=300;

pub(crate) fn default_database_path() -> String {
    "leasehold.db".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_job_interval_secs() -> u64 {
    20
}

pub(crate) fn default_job_lock_name() -> String {
    "reconcile-sync".to_string()
}

pub(crate) fn default_lock_ttl_secs() -> u64 {
    90
}

pub(crate) fn default_heartbeat_interval_secs() -> u64 {
    20
}

pub(crate) fn default_acquire_timeout_ms() -> u64 {
    2_000
}

pub(crate) fn default_reaper_interval_secs() -> u64 {
    300
}

pub(crate) fn default_shutdown_grace_secs() -> u64 {
    10
}
