//! Process lifecycle for background jobs.
//!
//! [`BackgroundJobs::initialize`] wires the scheduler at most once per
//! instance, however often it is called. [`BackgroundJobs::shutdown`] is
//! invoked by whoever supervises the process (the binary's signal handler,
//! an embedding service's own shutdown path); nothing here installs signal
//! handlers.

use crate::config::Config;
use crate::error::Result;
use crate::locks::LockManager;
use crate::scheduler::{Job, JobSchedule, Scheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// What shutdown did, for the final log line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Job and reaper timers stopped.
    pub timers_stopped: usize,
    /// Lock rows owned by this instance that were deleted.
    pub released: u64,
    /// Expired rows removed by the final sweep.
    pub cleaned: u64,
}

/// The protected job and reaper timers of one process.
pub struct BackgroundJobs {
    scheduler: Scheduler,
    job: Option<(Arc<dyn Job>, JobSchedule)>,
    reaper_interval: Duration,
    initialized: AtomicBool,
}

impl BackgroundJobs {
    /// Reaper only; add a job with [`BackgroundJobs::with_job`].
    pub fn new(manager: LockManager, reaper_interval: Duration) -> Self {
        Self {
            scheduler: Scheduler::new(manager),
            job: None,
            reaper_interval,
            initialized: AtomicBool::new(false),
        }
    }

    /// Wire `job` per `config`. The job is left out when `job_enabled` is
    /// false or no job is given.
    pub fn from_config(config: &Config, manager: LockManager, job: Option<Arc<dyn Job>>) -> Self {
        let background =
            Self::new(manager, config.reaper_interval()).with_stop_grace(config.shutdown_grace());
        match job {
            Some(job) if config.job_enabled => background.with_job(job, config.job_schedule()),
            Some(job) => {
                info!(job = job.name(), "Protected job disabled by configuration");
                background
            }
            None => {
                if config.job_enabled {
                    warn!("No job command configured, running the lock reaper only");
                }
                background
            }
        }
    }

    /// How long shutdown waits for an in-flight job run before cancelling it.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.scheduler = self.scheduler.with_stop_grace(grace);
        self
    }

    pub fn with_job(mut self, job: Arc<dyn Job>, schedule: JobSchedule) -> Self {
        self.job = Some((job, schedule));
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn manager(&self) -> &LockManager {
        self.scheduler.manager()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Start the job timer (if a job is wired) and the reaper.
    ///
    /// Returns `false` and does nothing on every call after the first.
    pub fn initialize(&self) -> bool {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Background jobs already initialized");
            return false;
        }

        info!(instance = %self.manager().instance_id(), "Initializing background jobs");

        if let Some((job, schedule)) = &self.job {
            self.scheduler.start_job(Arc::clone(job), schedule.clone());
        }
        self.scheduler.start_reaper(self.reaper_interval);
        true
    }

    /// Stop every timer, release every lease this instance holds, then sweep
    /// expired rows once more.
    ///
    /// Timers are awaited before anything is released, so an in-flight run
    /// finishes (or is cancelled after the stop grace) first and cannot write
    /// a row behind the release. The final sweep is best-effort; a failure
    /// there is only logged.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        info!(instance = %self.manager().instance_id(), "Shutting down background jobs");

        let timers_stopped = self.scheduler.stop_all().await;
        let released = self.manager().release_all_locks().await?;

        let cleaned = match self.manager().cleanup_expired_locks().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Final lock cleanup failed");
                0
            }
        };

        let report = ShutdownReport {
            timers_stopped,
            released,
            cleaned,
        };
        info!(
            timers = report.timers_stopped,
            released = report.released,
            cleaned = report.cleaned,
            "Shutdown complete"
        );
        Ok(report)
    }
}
