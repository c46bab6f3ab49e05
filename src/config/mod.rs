//! Configuration model for leasehold.
//!
//! This module defines the Config struct read from `leasehold.yaml`.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for optional fields, environment overrides, and
//! validation of config values.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::Config;
pub use types::{
    DATABASE_ENV, DEFAULT_CONFIG_FILE, JOB_COMMAND_ENV, JOB_ENABLED_ENV, JOB_INTERVAL_ENV,
};
