//! Process instance identity.
//!
//! Every replica claims and later verifies leases under a single identifier,
//! generated once at startup: `{env}-{host}-{pid}-{suffix}`. The random suffix
//! tells apart two processes that reuse a pid on the same host after a restart.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable naming the deployment environment (e.g. `production`).
pub const ENV_LABEL_VAR: &str = "LEASEHOLD_ENV";

/// Opaque identifier of the process that owns a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generate the identifier for this process from the environment.
    pub fn generate() -> Self {
        let env_label = std::env::var(ENV_LABEL_VAR).unwrap_or_else(|_| "development".to_string());
        Self::compose(&env_label, &host_name(), std::process::id())
    }

    /// Build an identifier from explicit parts plus a fresh random suffix.
    pub fn compose(env_label: &str, host: &str, pid: u32) -> Self {
        let suffix: u32 = rand::random();
        Self(format!("{}-{}-{}-{:08x}", env_label, host, pid, suffix))
    }

    /// Wrap an identifier that was generated elsewhere (e.g. read from a row).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Container runtimes set `HOSTNAME` to the pod/container name; prefer it.
fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}
