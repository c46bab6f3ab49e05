//! SQLite-backed lock store.
//!
//! Several replicas point at the same database file. WAL mode plus a busy
//! timeout lets their short write transactions interleave; every operation
//! is a single statement, so SQLite's own locking gives the atomicity the
//! manager relies on.

use super::{InsertOutcome, LeaseRenewal, LockRecord, LockStore};
use crate::error::{LeaseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long a statement waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS distributed_locks (
    lock_name          TEXT PRIMARY KEY NOT NULL,
    owner_instance_id  TEXT NOT NULL,
    acquired_at_ms     INTEGER NOT NULL,
    expires_at_ms      INTEGER NOT NULL,
    heartbeat_at_ms    INTEGER NOT NULL,
    metadata           TEXT
);
CREATE INDEX IF NOT EXISTS idx_distributed_locks_expires_at
    ON distributed_locks (expires_at_ms);
CREATE INDEX IF NOT EXISTS idx_distributed_locks_owner
    ON distributed_locks (owner_instance_id);
"#;

const COLUMNS: &str =
    "lock_name, owner_instance_id, acquired_at_ms, expires_at_ms, heartbeat_at_ms, metadata";

/// Lock store over a SQLite database shared by all replicas.
#[derive(Clone)]
pub struct SqliteLockStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLockStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                LeaseError::store(
                    &format!("failed to create database directory '{}'", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            LeaseError::store(
                &format!("failed to open lock database '{}'", path.display()),
                e,
            )
        })?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| LeaseError::store("failed to set busy timeout", e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| LeaseError::store("failed to enable WAL journal", e))?;

        Self::from_connection(conn)
    }

    /// A private in-memory database. Every clone shares the same connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LeaseError::store("failed to open in-memory database", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| LeaseError::store("failed to create lock table", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking statement off the async runtime.
    async fn run<T, F>(&self, context: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| LeaseError::store(context, e))?
        .map_err(|e| LeaseError::store(context, e))
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn insert(&self, record: &LockRecord) -> Result<InsertOutcome> {
        let record = record.clone();
        let metadata = metadata_to_sql(&record.metadata)?;

        self.run("insert lock", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO distributed_locks
                 (lock_name, owner_instance_id, acquired_at_ms, expires_at_ms, heartbeat_at_ms, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.lock_name,
                    record.owner_instance_id,
                    dt_to_ms(record.acquired_at),
                    dt_to_ms(record.expires_at),
                    dt_to_ms(record.heartbeat_at),
                    metadata
                ],
            );
            match inserted {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(InsertOutcome::Conflict)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn get(&self, lock_name: &str) -> Result<Option<LockRecord>> {
        let lock_name = lock_name.to_string();
        self.run("get lock", move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM distributed_locks WHERE lock_name = ?1", COLUMNS),
                params![lock_name],
                record_from_row,
            )
            .optional()
        })
        .await
    }

    async fn renew(
        &self,
        lock_name: &str,
        owner: &str,
        renewal: &LeaseRenewal,
    ) -> Result<Option<LockRecord>> {
        let lock_name = lock_name.to_string();
        let owner = owner.to_string();
        let expires_at = dt_to_ms(renewal.expires_at);
        let heartbeat_at = dt_to_ms(renewal.heartbeat_at);
        let metadata = metadata_to_sql(&renewal.metadata)?;

        self.run("renew lock", move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE distributed_locks
                     SET expires_at_ms = ?3, heartbeat_at_ms = ?4, metadata = ?5
                     WHERE lock_name = ?1 AND owner_instance_id = ?2
                     RETURNING {}",
                    COLUMNS
                ),
                params![lock_name, owner, expires_at, heartbeat_at, metadata],
                record_from_row,
            )
            .optional()
        })
        .await
    }

    async fn take_over(
        &self,
        observed_expires_at: DateTime<Utc>,
        record: &LockRecord,
    ) -> Result<bool> {
        let record = record.clone();
        let observed = dt_to_ms(observed_expires_at);
        let metadata = metadata_to_sql(&record.metadata)?;

        self.run("take over lock", move |conn| {
            let changed = conn.execute(
                "UPDATE distributed_locks
                 SET owner_instance_id = ?3, acquired_at_ms = ?4, expires_at_ms = ?5,
                     heartbeat_at_ms = ?6, metadata = ?7
                 WHERE lock_name = ?1 AND expires_at_ms = ?2",
                params![
                    record.lock_name,
                    observed,
                    record.owner_instance_id,
                    dt_to_ms(record.acquired_at),
                    dt_to_ms(record.expires_at),
                    dt_to_ms(record.heartbeat_at),
                    metadata
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn touch_heartbeat(
        &self,
        lock_name: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let lock_name = lock_name.to_string();
        let owner = owner.to_string();
        let at = dt_to_ms(at);

        self.run("touch heartbeat", move |conn| {
            conn.execute(
                "UPDATE distributed_locks SET heartbeat_at_ms = ?3
                 WHERE lock_name = ?1 AND owner_instance_id = ?2",
                params![lock_name, owner, at],
            )
            .map(|n| n as u64)
        })
        .await
    }

    async fn delete_owned(&self, lock_name: &str, owner: &str) -> Result<u64> {
        let lock_name = lock_name.to_string();
        let owner = owner.to_string();

        self.run("delete owned lock", move |conn| {
            conn.execute(
                "DELETE FROM distributed_locks WHERE lock_name = ?1 AND owner_instance_id = ?2",
                params![lock_name, owner],
            )
            .map(|n| n as u64)
        })
        .await
    }

    async fn delete_all_owned(&self, owner: &str) -> Result<u64> {
        let owner = owner.to_string();

        self.run("delete all owned locks", move |conn| {
            conn.execute(
                "DELETE FROM distributed_locks WHERE owner_instance_id = ?1",
                params![owner],
            )
            .map(|n| n as u64)
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let now = dt_to_ms(now);

        self.run("delete expired locks", move |conn| {
            conn.execute(
                "DELETE FROM distributed_locks WHERE expires_at_ms < ?1",
                params![now],
            )
            .map(|n| n as u64)
        })
        .await
    }

    async fn delete(&self, lock_name: &str) -> Result<u64> {
        let lock_name = lock_name.to_string();

        self.run("delete lock", move |conn| {
            conn.execute(
                "DELETE FROM distributed_locks WHERE lock_name = ?1",
                params![lock_name],
            )
            .map(|n| n as u64)
        })
        .await
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<LockRecord>> {
        let now = dt_to_ms(now);

        self.run("list active locks", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM distributed_locks
                 WHERE expires_at_ms > ?1
                 ORDER BY acquired_at_ms ASC, lock_name ASC",
                COLUMNS
            ))?;
            let rows = stmt.query_map(params![now], record_from_row)?;
            rows.collect()
        })
        .await
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<LockRecord> {
    let metadata = row
        .get::<_, Option<String>>(5)?
        .map(|raw| {
            serde_json::from_str::<Value>(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))
        })
        .transpose()?;

    Ok(LockRecord {
        lock_name: row.get(0)?,
        owner_instance_id: row.get(1)?,
        acquired_at: ms_to_dt(row.get(2)?),
        expires_at: ms_to_dt(row.get(3)?),
        heartbeat_at: ms_to_dt(row.get(4)?),
        metadata,
    })
}

fn metadata_to_sql(metadata: &Option<Value>) -> Result<Option<String>> {
    metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| LeaseError::store("failed to serialize lock metadata", e))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Out-of-range values read back as the epoch, i.e. long expired.
fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
