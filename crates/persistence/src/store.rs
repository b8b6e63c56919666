//! Durable project store (SQLite).
//!
//! Holds the single [`ProjectSnapshot`] record in a versioned, transactional
//! SQLite database. The connection pool is opened lazily on first use and
//! memoized: concurrent callers of [`ProjectStore::init`] wait on the same
//! open instead of racing to create their own.
//!
//! ## Schema versions
//!
//! The version lives in `PRAGMA user_version` and is upgraded step by step
//! inside one transaction:
//!
//! | version | change |
//! |---------|--------|
//! | 1 | `snapshots` table (one row per named record) |
//! | 2 | `schema_meta` table recording upgrade bookkeeping |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use questdesk_core::{DomainError, ProjectSnapshot, SnapshotName};

/// Latest schema version this build knows how to create and read.
pub const SCHEMA_VERSION: i64 = 2;

/// Lifecycle of the store handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreState {
    Unopened,
    Opening,
    Open,
    Closed,
}

impl StoreState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StoreState::Opening,
            2 => StoreState::Open,
            3 => StoreState::Closed,
            _ => StoreState::Unopened,
        }
    }
}

/// Project store operation error.
///
/// Failures propagate to the caller; the store never retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to prepare data directory {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open project store at {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("stored snapshot is unreadable: {0}")]
    Corrupt(#[from] DomainError),

    #[error("project store schema v{found} is newer than supported v{supported}")]
    UnsupportedVersion { found: i64, supported: i64 },

    #[error("project store is closed")]
    Closed,
}

/// SQLite-backed store for the project snapshot.
///
/// Cheap to clone; clones share the same lazily opened pool.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    path: PathBuf,
    record: SnapshotName,
    pool: Arc<Mutex<Option<SqlitePool>>>,
    state: Arc<AtomicU8>,
    opens: Arc<AtomicU64>,
}

impl ProjectStore {
    /// Create a store for the database at `path` (nothing is opened yet).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            record: SnapshotName::project(),
            pool: Arc::new(Mutex::new(None)),
            state: Arc::new(AtomicU8::new(0)),
            opens: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Store the snapshot under a different record name.
    pub fn with_record(mut self, record: SnapshotName) -> Self {
        self.record = record;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// How many times a database connection pool was actually opened.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Acquire)
    }

    /// Open the database and upgrade its schema (once per process).
    ///
    /// Idempotent: later calls return the memoized pool. If opening fails the
    /// handle stays unopened and a later call tries again.
    pub async fn init(&self) -> Result<SqlitePool, StoreError> {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.as_ref() {
            return Ok(pool.clone());
        }
        if self.state() == StoreState::Closed {
            return Err(StoreError::Closed);
        }

        self.state.store(1, Ordering::Release);
        match self.open_and_upgrade().await {
            Ok(pool) => {
                *pool_guard = Some(pool.clone());
                self.state.store(2, Ordering::Release);
                Ok(pool)
            }
            Err(err) => {
                self.state.store(0, Ordering::Release);
                Err(err)
            }
        }
    }

    async fn open_and_upgrade(&self) -> Result<SqlitePool, StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::DataDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Open {
                path: self.path.clone(),
                source,
            })?;
        self.opens.fetch_add(1, Ordering::AcqRel);

        if let Err(err) = upgrade_schema(&pool).await {
            pool.close().await;
            return Err(err);
        }

        info!(path = ?self.path, "project store opened");
        Ok(pool)
    }

    /// Schema version recorded in the open database.
    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        let pool = self.init().await?;
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;
        Ok(version)
    }

    /// Overwrite the project record with `snapshot` in one transaction.
    #[instrument(
        skip(self, snapshot),
        fields(record = %self.record, documents = snapshot.document_count()),
        err
    )]
    pub async fn save_project(&self, snapshot: &ProjectSnapshot) -> Result<(), StoreError> {
        let pool = self.init().await?;
        let data = serde_json::to_string(snapshot).map_err(StoreError::Serialize)?;

        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO snapshots (name, data, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name)
            DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(self.record.as_str())
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(bytes = data.len(), "project snapshot saved");
        Ok(())
    }

    /// Read the project record; `None` if it was never written.
    #[instrument(skip(self), fields(record = %self.record), err)]
    pub async fn load_project(&self) -> Result<Option<ProjectSnapshot>, StoreError> {
        let pool = self.init().await?;

        let row = sqlx::query(
            r#"
            SELECT data
            FROM snapshots
            WHERE name = ?1
            "#,
        )
        .bind(self.record.as_str())
        .fetch_optional(&pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: String = row.try_get("data")?;
        Ok(Some(ProjectSnapshot::from_json(&data)?))
    }

    /// Delete the project record.
    #[instrument(skip(self), fields(record = %self.record), err)]
    pub async fn clear_project(&self) -> Result<(), StoreError> {
        let pool = self.init().await?;

        sqlx::query(
            r#"
            DELETE FROM snapshots
            WHERE name = ?1
            "#,
        )
        .bind(self.record.as_str())
        .execute(&pool)
        .await?;

        Ok(())
    }

    /// Close the pool. Further operations fail with [`StoreError::Closed`].
    pub async fn close(&self) {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.take() {
            pool.close().await;
            info!(path = ?self.path, "project store closed");
        }
        self.state.store(3, Ordering::Release);
    }
}

async fn upgrade_schema(pool: &SqlitePool) -> Result<i64, StoreError> {
    let mut tx = pool.begin().await?;

    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *tx)
        .await?;

    if current > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        tx.commit().await?;
        return Ok(current);
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        apply_schema_step(&mut tx, version).await?;
    }

    // PRAGMA does not accept bound parameters.
    let set_version = format!("PRAGMA user_version = {SCHEMA_VERSION}");
    sqlx::query(&set_version).execute(&mut *tx).await?;
    tx.commit().await?;

    info!(from = current, to = SCHEMA_VERSION, "project store schema upgraded");
    Ok(SCHEMA_VERSION)
}

async fn apply_schema_step(conn: &mut SqliteConnection, version: i64) -> Result<(), StoreError> {
    match version {
        1 => {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS snapshots (
                    name       TEXT PRIMARY KEY,
                    data       TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            )
            .execute(&mut *conn)
            .await?;
        }
        2 => {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS schema_meta (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )
                "#,
            )
            .execute(&mut *conn)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO schema_meta (key, value)
                VALUES ('upgraded_at', ?1)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await?;
        }
        _ => {}
    }

    debug!(version, "applied schema step");
    Ok(())
}
