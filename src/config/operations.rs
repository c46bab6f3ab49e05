//! Config loading, validation, and environment overrides.

use super::model::Config;
use super::types::*;
use crate::error::{LeaseError, Result};
use crate::locks::LockOptions;
use crate::scheduler::JobSchedule;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LeaseError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string. An empty document yields the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| LeaseError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            LeaseError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Build the effective config for this process.
    ///
    /// Reads `path` if given (it must exist), else `leasehold.yaml` in the
    /// working directory if present, else the defaults. Environment overrides
    /// are applied on top and the result is validated.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Out-of-range or unparsable intervals are ignored with a warning, keeping
    /// the configured value.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DATABASE_ENV).filter(|v| !v.trim().is_empty()) {
            self.database_path = path;
        }

        if let Some(value) = lookup(JOB_ENABLED_ENV) {
            self.job_enabled = !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
        }

        if let Some(value) = lookup(JOB_INTERVAL_ENV) {
            match value.trim().parse::<u64>() {
                Ok(secs) if JOB_INTERVAL_RANGE.contains(&secs) => self.job_interval_secs = secs,
                _ => warn!(
                    var = JOB_INTERVAL_ENV,
                    value = %value,
                    fallback = self.job_interval_secs,
                    "Ignoring job interval outside {}..={} seconds",
                    JOB_INTERVAL_RANGE.start(),
                    JOB_INTERVAL_RANGE.end()
                ),
            }
        }

        if let Some(command) = lookup(JOB_COMMAND_ENV).filter(|v| !v.trim().is_empty()) {
            self.job_command = Some(command);
        }
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `database_path` and `job_lock_name` must be non-empty
    /// - `job_interval_secs` must be within 5..=300
    /// - `lock_ttl_secs`, `heartbeat_interval_secs` and `reaper_interval_secs`
    ///   must be positive, with the heartbeat shorter than the TTL
    /// - `job_command`, if set, must be non-empty
    /// - `retry` must make progress
    pub fn validate(&self) -> Result<()> {
        if self.database_path.trim().is_empty() {
            return Err(invalid("database_path must not be empty"));
        }

        if self.job_lock_name.trim().is_empty() {
            return Err(invalid("job_lock_name must not be empty"));
        }

        if !JOB_INTERVAL_RANGE.contains(&self.job_interval_secs) {
            return Err(invalid(&format!(
                "job_interval_secs must be between {} and {} (found {})",
                JOB_INTERVAL_RANGE.start(),
                JOB_INTERVAL_RANGE.end(),
                self.job_interval_secs
            )));
        }

        if self.lock_ttl_secs == 0 {
            return Err(invalid("lock_ttl_secs must be greater than 0"));
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(invalid("heartbeat_interval_secs must be greater than 0"));
        }

        if self.heartbeat_interval_secs >= self.lock_ttl_secs {
            return Err(invalid(&format!(
                "heartbeat_interval_secs ({}) must be less than lock_ttl_secs ({})",
                self.heartbeat_interval_secs, self.lock_ttl_secs
            )));
        }

        if self.reaper_interval_secs == 0 {
            return Err(invalid("reaper_interval_secs must be greater than 0"));
        }

        if let Some(command) = &self.job_command
            && command.trim().is_empty()
        {
            return Err(invalid("job_command must not be empty when set"));
        }

        self.retry.validate().map_err(|e| invalid(&e))?;

        Ok(())
    }

    /// Lease options for each protected job run.
    pub fn job_lock_options(&self) -> LockOptions {
        LockOptions::default()
            .with_ttl(Duration::from_secs(self.lock_ttl_secs))
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_interval_secs))
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
    }

    /// Schedule for the protected job.
    pub fn job_schedule(&self) -> JobSchedule {
        if self.lock_ttl_secs <= self.job_interval_secs {
            warn!(
                ttl_secs = self.lock_ttl_secs,
                interval_secs = self.job_interval_secs,
                "Job lock TTL does not exceed the job interval"
            );
        }
        JobSchedule::new(
            self.job_lock_name.clone(),
            Duration::from_secs(self.job_interval_secs),
        )
        .with_lock_options(self.job_lock_options())
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn invalid(message: &str) -> LeaseError {
    LeaseError::UserError(format!("config validation failed: {}", message))
}
