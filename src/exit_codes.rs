//! Exit code constants for the leasehold binary.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 2: Lock store failure
//! - 3: Protected job failure
//! - 4: Lock acquisition failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration or lock request.
pub const USER_ERROR: i32 = 1;

/// Lock store failure: the shared table could not be opened or queried.
pub const STORE_FAILURE: i32 = 2;

/// Protected job failure: the job body ran and returned an error.
pub const JOB_FAILURE: i32 = 3;

/// Lock acquisition failure: the lock is held by another instance.
pub const LOCK_FAILURE: i32 = 4;
