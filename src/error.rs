//! Error types for leasehold.
//!
//! Uses thiserror for derive macros. Contention and acquisition timeouts are
//! not errors (see [`crate::locks::Acquisition`]); these variants cover the
//! failures a caller actually has to handle.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for leasehold operations.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// User provided invalid arguments or configuration.
    #[error("{0}")]
    UserError(String),

    /// A lock request was malformed (empty name, zero TTL, ...).
    #[error("Invalid lock request: {0}")]
    InvalidLockRequest(String),

    /// The lock store could not be reached or returned an unexpected error.
    #[error("Lock store error: {0}")]
    Store(String),

    /// The caller required a lock that is held elsewhere.
    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    /// The protected job body failed.
    #[error("Job failed: {0}")]
    JobError(String),
}

impl LeaseError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LeaseError::UserError(_) => exit_codes::USER_ERROR,
            LeaseError::InvalidLockRequest(_) => exit_codes::USER_ERROR,
            LeaseError::Store(_) => exit_codes::STORE_FAILURE,
            LeaseError::LockError(_) => exit_codes::LOCK_FAILURE,
            LeaseError::JobError(_) => exit_codes::JOB_FAILURE,
        }
    }

    pub(crate) fn store(context: &str, err: impl std::fmt::Display) -> Self {
        LeaseError::Store(format!("{}: {}", context, err))
    }
}

/// Result type alias for leasehold operations.
pub type Result<T> = std::result::Result<T, LeaseError>;
