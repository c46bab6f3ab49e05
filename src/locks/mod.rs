//! Lease-based distributed locks.
//!
//! Replicas coordinate through nothing but the rows of a shared
//! [`LockStore`](crate::store::LockStore). A lease is held by exactly one
//! instance until it is released, reaped, or taken over after expiry.
//!
//! # Acquisition
//!
//! [`LockManager::acquire_lock`] retries until its acquire timeout, sleeping
//! per the manager's [`RetryPolicy`] between attempts. Each attempt:
//! 1. reaps expired rows
//! 2. inserts a new row (unique on the lock name)
//! 3. on conflict, renews the row if this instance owns it, or takes it over
//!    with a compare-and-swap on `expires_at` if it has expired
//!
//! # Heartbeats
//!
//! Every held lease has a timer touching `heartbeat_at`. Heartbeats never
//! extend `expires_at`; the TTL is a hard ceiling on one acquisition, and only
//! re-acquiring the same name pushes it forward. Size the TTL for the longest
//! expected run of the protected operation.
//!
//! # Scoped use
//!
//! [`LockManager::with_lock`] and [`LeaseGuard`] release on every exit path,
//! including cancellation of the surrounding future.

mod backoff;
mod guard;
mod heartbeat;
mod manager;
mod options;


pub use backoff::RetryPolicy;
pub use guard::LeaseGuard;
pub use manager::LockManager;
pub use options::{AcquireKind, Acquisition, LockOptions};
