//! Per-lock heartbeat timers.
//!
//! While this instance holds a lease, a background task touches the row's
//! `heartbeat_at` every interval. Heartbeats only signal liveness; they never
//! move `expires_at`. When a touch matches no row or fails, the task stops
//! itself: the lease is gone and nothing here should pretend otherwise.

use crate::instance::InstanceId;
use crate::store::{LockStore, timestamp_now};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Heartbeat {
    /// Distinguishes a restarted timer from the one it replaced.
    id: u64,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn stop(self) {
        let _ = self.stop_tx.send(true);
        // The task may be mid-touch; aborting is fine since every write is
        // a single owner-filtered statement.
        self.handle.abort();
    }
}

type Timers = Arc<Mutex<HashMap<String, Heartbeat>>>;

/// Registry of running heartbeat timers, keyed by lock name.
///
/// Owned by one [`crate::locks::LockManager`]; there is no process-wide
/// timer map.
pub(crate) struct HeartbeatRegistry {
    store: Arc<dyn LockStore>,
    owner: InstanceId,
    timers: Timers,
    next_id: AtomicU64,
}

impl HeartbeatRegistry {
    pub(crate) fn new(store: Arc<dyn LockStore>, owner: InstanceId) -> Self {
        Self {
            store,
            owner,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a timer for `lock_name`, replacing any existing one.
    pub(crate) fn start(&self, lock_name: &str, interval: Duration) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.store),
            self.owner.clone(),
            lock_name.to_string(),
            interval,
            id,
            stop_rx,
            Arc::clone(&self.timers),
        ));

        let previous = self.timers.lock().insert(
            lock_name.to_string(),
            Heartbeat {
                id,
                stop_tx,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.stop();
        }
        debug!(lock = lock_name, interval_ms = interval.as_millis() as u64, "Heartbeat started");
    }

    /// Start a timer unless one is already running for `lock_name`.
    pub(crate) fn ensure_running(&self, lock_name: &str, interval: Duration) {
        if !self.is_running(lock_name) {
            self.start(lock_name, interval);
        }
    }

    /// Stop the timer for `lock_name`. Returns whether one was running.
    pub(crate) fn stop(&self, lock_name: &str) -> bool {
        let removed = self.timers.lock().remove(lock_name);
        match removed {
            Some(heartbeat) => {
                heartbeat.stop();
                debug!(lock = lock_name, "Heartbeat stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every timer. Returns how many were running.
    pub(crate) fn stop_all(&self) -> usize {
        let drained: Vec<Heartbeat> = self.timers.lock().drain().map(|(_, hb)| hb).collect();
        let count = drained.len();
        for heartbeat in drained {
            heartbeat.stop();
        }
        count
    }

    pub(crate) fn is_running(&self, lock_name: &str) -> bool {
        self.timers
            .lock()
            .get(lock_name)
            .is_some_and(|hb| !hb.handle.is_finished())
    }

    /// Names of locks with a running timer, sorted.
    pub(crate) fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for HeartbeatRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn heartbeat_loop(
    store: Arc<dyn LockStore>,
    owner: InstanceId,
    lock_name: String,
    interval: Duration,
    id: u64,
    mut stop: watch::Receiver<bool>,
    timers: Timers,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; acquisition already wrote heartbeat_at.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        match store
            .touch_heartbeat(&lock_name, owner.as_str(), timestamp_now())
            .await
        {
            Ok(0) => {
                warn!(lock = %lock_name, "Lease lost, stopping heartbeat");
                break;
            }
            Ok(_) => debug!(lock = %lock_name, "Heartbeat"),
            Err(e) => {
                warn!(lock = %lock_name, error = %e, "Heartbeat failed, stopping");
                break;
            }
        }
    }

    // Drop our own entry unless a newer timer has replaced it.
    let mut timers = timers.lock();
    if timers.get(&lock_name).is_some_and(|hb| hb.id == id) {
        timers.remove(&lock_name);
    }
}
