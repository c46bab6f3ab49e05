use crate::error::{LeaseError, Result};
use crate::instance::InstanceId;
use crate::locks::{LockManager, LockOptions, RetryPolicy};
use crate::scheduler::{Job, JobReport};
use crate::store::{InsertOutcome, LeaseRenewal, LockRecord, LockStore, SqliteLockStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

static CWD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub(crate) struct DirGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl DirGuard {
    pub(crate) fn new(new_dir: &Path) -> Self {
        // Changing the process current working directory is global and not thread-safe.
        // Lock it so tests don't race even if a #[serial] annotation is missed.
        let lock = CWD_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(new_dir).unwrap();
        Self {
            original,
            _lock: lock,
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

pub(crate) fn memory_store() -> Arc<dyn LockStore> {
    Arc::new(SqliteLockStore::open_in_memory().unwrap())
}

/// Manager with a fixed id and a short retry delay so tests stay fast.
pub(crate) fn test_manager(store: &Arc<dyn LockStore>, instance: &str) -> LockManager {
    LockManager::with_retry_policy(
        Arc::clone(store),
        InstanceId::from_raw(instance),
        RetryPolicy::Fixed { delay_ms: 10 },
    )
}

pub(crate) fn quick_options() -> LockOptions {
    LockOptions::default()
        .with_ttl(Duration::from_secs(30))
        .with_heartbeat_interval(Duration::from_secs(10))
        .with_acquire_timeout(Duration::from_millis(200))
}

/// Write a row directly, bypassing any manager.
pub(crate) async fn seed_lock(
    store: &Arc<dyn LockStore>,
    name: &str,
    owner: &str,
    acquired_at: DateTime<Utc>,
    ttl: chrono::Duration,
) -> LockRecord {
    let record = LockRecord::new_lease(name, owner, acquired_at, ttl, None);
    assert_eq!(store.insert(&record).await.unwrap(), InsertOutcome::Inserted);
    record
}

/// Store wrapper that fails on demand.
pub(crate) struct FlakyStore {
    inner: Arc<dyn LockStore>,
    failures_left: AtomicU32,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: Arc<dyn LockStore>) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` calls, whatever they are.
    pub(crate) fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched back.
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LeaseError::store(operation, "connection refused"));
        }
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(LeaseError::store(operation, "connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn insert(&self, record: &LockRecord) -> Result<InsertOutcome> {
        self.check("insert lock")?;
        self.inner.insert(record).await
    }

    async fn get(&self, lock_name: &str) -> Result<Option<LockRecord>> {
        self.check("get lock")?;
        self.inner.get(lock_name).await
    }

    async fn renew(
        &self,
        lock_name: &str,
        owner: &str,
        renewal: &LeaseRenewal,
    ) -> Result<Option<LockRecord>> {
        self.check("renew lock")?;
        self.inner.renew(lock_name, owner, renewal).await
    }

    async fn take_over(
        &self,
        observed_expires_at: DateTime<Utc>,
        record: &LockRecord,
    ) -> Result<bool> {
        self.check("take over lock")?;
        self.inner.take_over(observed_expires_at, record).await
    }

    async fn touch_heartbeat(
        &self,
        lock_name: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        self.check("touch heartbeat")?;
        self.inner.touch_heartbeat(lock_name, owner, at).await
    }

    async fn delete_owned(&self, lock_name: &str, owner: &str) -> Result<u64> {
        self.check("delete owned lock")?;
        self.inner.delete_owned(lock_name, owner).await
    }

    async fn delete_all_owned(&self, owner: &str) -> Result<u64> {
        self.check("delete all owned locks")?;
        self.inner.delete_all_owned(owner).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check("delete expired locks")?;
        self.inner.delete_expired(now).await
    }

    async fn delete(&self, lock_name: &str) -> Result<u64> {
        self.check("delete lock")?;
        self.inner.delete(lock_name).await
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<LockRecord>> {
        self.check("list active locks")?;
        self.inner.list_active(now).await
    }
}

/// Job that counts its runs and records the highest number of overlapping runs.
pub(crate) struct CountingJob {
    name: String,
    runs: AtomicUsize,
    running: AtomicUsize,
    max_concurrent: AtomicUsize,
    work: Duration,
    fail: AtomicBool,
    panic_next: AtomicBool,
    completed: AtomicUsize,
}

impl CountingJob {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            runs: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            work: Duration::ZERO,
            fail: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
        }
    }

    /// Each run sleeps this long before returning.
    pub(crate) fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// The next run panics instead of returning.
    pub(crate) fn panic_once(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Runs that got through their work without being cancelled.
    pub(crate) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<JobReport> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            panic!("report index out of range");
        }

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("upstream returned 503");
        }
        Ok(JobReport {
            total: 3,
            updated: 2,
            errors: 0,
            error_details: Vec::new(),
        })
    }
}
