//! Periodic job scheduling.
//!
//! Two kinds of timer run per process:
//! - protected job timers, which run a [`Job`] through
//!   [`LockManager::with_lock`] so only one replica runs it per tick
//! - a reaper timer, which calls [`LockManager::cleanup_expired_locks`]
//!   directly; reaping is idempotent so it needs no lock
//!
//! Losing the race for a job lock is the normal state of every replica but
//! one and is logged as a skip, not an error. Job failures are logged and
//! the timer keeps ticking.

mod job;


pub use job::{CommandJob, Job, JobReport};

use crate::error::Result;
use crate::instance::InstanceId;
use crate::locks::{LockManager, LockOptions};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long stopping a timer waits for an in-flight run before aborting it.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// When and under which lock a job runs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSchedule {
    /// Lock dedicated to this job.
    pub lock_name: String,

    /// Time between runs. The first run happens immediately.
    pub interval: Duration,

    /// TTL, heartbeat and acquire timeout for each run's lease. The TTL
    /// should exceed the interval; the acquire timeout should be short so a
    /// losing replica does not stall its own next tick.
    pub lock: LockOptions,
}

impl JobSchedule {
    pub fn new(lock_name: impl Into<String>, interval: Duration) -> Self {
        Self {
            lock_name: lock_name.into(),
            interval,
            lock: LockOptions::default()
                .with_ttl(Duration::from_secs(90))
                .with_heartbeat_interval(Duration::from_secs(20))
                .with_acquire_timeout(Duration::from_secs(2)),
        }
    }

    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }
}

/// Result of one protected run.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// This instance held the lock and the job finished.
    Completed { report: JobReport, duration: Duration },
    /// Another instance held the lock.
    Skipped,
    /// The job body failed. The lock was released.
    Failed(String),
}

/// Snapshot of a job's timer and lock, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub lock_name: String,
    pub running: bool,
    pub interval_secs: Option<u64>,
    pub instance_id: InstanceId,
    pub lock: Option<LockHolder>,
}

/// Who holds a job's lock right now.
#[derive(Debug, Clone, Serialize)]
pub struct LockHolder {
    pub current_holder: String,
    pub owned_by_this_instance: bool,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

struct Timer {
    interval: Duration,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn spawn<F, Fut>(interval: Duration, run_immediately: bool, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            if !run_immediately {
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => tick().await,
                }
            }
        });

        Self {
            interval,
            stop_tx,
            handle,
        }
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop and wait for an in-flight run to finish. After `grace`
    /// the task is aborted; a run cancelled that way has stopped its heartbeat
    /// and queued its release (from the guard's `Drop`) by the time this
    /// returns.
    async fn stop(self, grace: Duration) {
        let _ = self.stop_tx.send(true);
        let mut handle = self.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Timer still busy after grace period, aborting"
            );
            handle.abort();
            let _ = handle.await;
        }
    }

    fn abort(self) {
        let _ = self.stop_tx.send(true);
        self.handle.abort();
    }
}

/// Owns this process's job and reaper timers.
pub struct Scheduler {
    manager: LockManager,
    jobs: Mutex<HashMap<String, Timer>>,
    reaper: Mutex<Option<Timer>>,
    stop_grace: Duration,
}

impl Scheduler {
    pub fn new(manager: LockManager) -> Self {
        Self {
            manager,
            jobs: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// How long the `stop_*` methods wait for an in-flight run.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn manager(&self) -> &LockManager {
        &self.manager
    }

    /// Start running `job` every `schedule.interval`, keyed by the schedule's
    /// lock name. Runs once immediately.
    ///
    /// Returns `false` without starting anything if a timer for that lock
    /// name is already running.
    pub fn start_job(&self, job: Arc<dyn Job>, schedule: JobSchedule) -> bool {
        let mut jobs = self.jobs.lock();
        if jobs.get(&schedule.lock_name).is_some_and(Timer::is_running) {
            debug!(lock = %schedule.lock_name, "Job timer already running");
            return false;
        }

        info!(
            job = job.name(),
            lock = %schedule.lock_name,
            interval_secs = schedule.interval.as_secs(),
            "Starting job timer"
        );

        let manager = self.manager.clone();
        let lock_name = schedule.lock_name.clone();
        let interval = schedule.interval;
        let schedule = Arc::new(schedule);
        let timer = Timer::spawn(interval, true, move || {
            let manager = manager.clone();
            let job = Arc::clone(&job);
            let schedule = Arc::clone(&schedule);
            async move {
                run_protected(&manager, job.as_ref(), &schedule).await;
            }
        });

        if let Some(previous) = jobs.insert(lock_name, timer) {
            previous.abort();
        }
        true
    }

    /// Stop the job timer for `lock_name`, letting an in-flight run finish
    /// within the stop grace. Returns whether one existed.
    pub async fn stop_job(&self, lock_name: &str) -> bool {
        let removed = self.jobs.lock().remove(lock_name);
        match removed {
            Some(timer) => {
                timer.stop(self.stop_grace).await;
                info!(lock = lock_name, "Job timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_job_running(&self, lock_name: &str) -> bool {
        self.jobs.lock().get(lock_name).is_some_and(Timer::is_running)
    }

    /// Start the reaper. The first sweep happens one interval from now.
    /// Returns `false` if it is already running.
    pub fn start_reaper(&self, interval: Duration) -> bool {
        let mut reaper = self.reaper.lock();
        if reaper.as_ref().is_some_and(Timer::is_running) {
            debug!("Reaper already running");
            return false;
        }

        info!(interval_secs = interval.as_secs(), "Starting lock reaper");
        let manager = self.manager.clone();
        let timer = Timer::spawn(interval, false, move || {
            let manager = manager.clone();
            async move {
                if let Err(e) = manager.cleanup_expired_locks().await {
                    warn!(error = %e, "Lock reaper failed");
                }
            }
        });

        if let Some(previous) = reaper.replace(timer) {
            previous.abort();
        }
        true
    }

    pub async fn stop_reaper(&self) -> bool {
        let removed = self.reaper.lock().take();
        match removed {
            Some(timer) => {
                timer.stop(self.stop_grace).await;
                info!("Lock reaper stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_reaper_running(&self) -> bool {
        self.reaper.lock().as_ref().is_some_and(Timer::is_running)
    }

    /// Stop every timer and wait for them to wind down. Returns how many
    /// were stopped.
    ///
    /// When this returns no timer task is left that could still write to
    /// the store.
    pub async fn stop_all(&self) -> usize {
        let mut timers: Vec<Timer> = self.jobs.lock().drain().map(|(_, t)| t).collect();
        timers.extend(self.reaper.lock().take());

        let stopped = timers.len();
        futures::future::join_all(timers.into_iter().map(|t| t.stop(self.stop_grace))).await;
        stopped
    }

    /// Run `job` once under its lock, outside any timer.
    pub async fn run_once(&self, job: &dyn Job, schedule: &JobSchedule) -> TickOutcome {
        run_protected(&self.manager, job, schedule).await
    }

    /// Timer state plus the current holder of the job's lock.
    pub async fn job_info(&self, lock_name: &str) -> Result<JobInfo> {
        let (running, interval_secs) = {
            let jobs = self.jobs.lock();
            match jobs.get(lock_name) {
                Some(timer) => (timer.is_running(), Some(timer.interval.as_secs())),
                None => (false, None),
            }
        };

        let instance_id = self.manager.instance_id().clone();
        let lock = self
            .manager
            .get_lock_info(lock_name)
            .await?
            .map(|record| LockHolder {
                owned_by_this_instance: record.is_owned_by(instance_id.as_str()),
                current_holder: record.owner_instance_id,
                acquired_at: record.acquired_at,
                expires_at: record.expires_at,
                last_heartbeat: record.heartbeat_at,
            });

        Ok(JobInfo {
            lock_name: lock_name.to_string(),
            running,
            interval_secs,
            instance_id,
            lock,
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, timer) in self.jobs.get_mut().drain() {
            timer.abort();
        }
        if let Some(timer) = self.reaper.get_mut().take() {
            timer.abort();
        }
    }
}

/// One tick: take the job's lock, run the job, release, log the outcome.
async fn run_protected(manager: &LockManager, job: &dyn Job, schedule: &JobSchedule) -> TickOutcome {
    let started = Instant::now();
    let metadata = serde_json::json!({
        "operation": job.name(),
        "instance_id": manager.instance_id(),
        "started_at": Utc::now().to_rfc3339(),
    });
    let options = schedule.lock.clone().with_metadata(metadata);

    let result = manager
        .with_lock(&schedule.lock_name, &options, || run_catching_panics(job))
        .await;

    match result {
        Ok(Some(report)) => {
            let duration = started.elapsed();
            log_report(job.name(), manager.instance_id(), &report, duration);
            TickOutcome::Completed { report, duration }
        }
        Ok(None) => {
            info!(
                job = job.name(),
                lock = %schedule.lock_name,
                "Lock held by another instance, skipping run"
            );
            TickOutcome::Skipped
        }
        Err(e) => {
            error!(
                job = job.name(),
                lock = %schedule.lock_name,
                duration_ms = started.elapsed().as_millis() as u64,
                error = %format!("{:#}", e),
                "Job failed"
            );
            TickOutcome::Failed(format!("{:#}", e))
        }
    }
}

/// A panicking job body fails its run instead of unwinding into the timer.
async fn run_catching_panics(job: &dyn Job) -> anyhow::Result<JobReport> {
    match AssertUnwindSafe(job.run()).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("job panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn log_report(job: &str, instance: &InstanceId, report: &JobReport, duration: Duration) {
    if report.total == 0 {
        info!(job, instance = %instance, duration_ms = duration.as_millis() as u64, "Job ran, nothing to do");
        return;
    }

    info!(
        job,
        instance = %instance,
        total = report.total,
        updated = report.updated,
        errors = report.errors,
        duration_ms = duration.as_millis() as u64,
        "Job completed"
    );

    if report.errors > 0 {
        warn!(
            job,
            errors = report.errors,
            details = ?report.error_details,
            "Job finished with item errors"
        );
    }
}
