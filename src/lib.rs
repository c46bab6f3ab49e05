//! Leasehold: lease-based distributed locks over a shared SQL table.
//!
//! Replicas of one service share a single lock table. Each lease row names a
//! resource, the instance holding it, and when the lease expires. On top of
//! that sit a heartbeat per held lease, scoped execution that always
//! releases, and a scheduler that runs a periodic job on exactly one replica
//! per tick while a reaper sweeps abandoned rows.

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod instance;
pub mod lifecycle;
pub mod locks;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{LeaseError, Result};
pub use instance::InstanceId;
pub use lifecycle::{BackgroundJobs, ShutdownReport};
pub use locks::{Acquisition, LeaseGuard, LockManager, LockOptions};
pub use store::{LockRecord, LockStore, SqliteLockStore};
