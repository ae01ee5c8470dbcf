//! Persistent record storage backed by SQLite.

use crate::error::StoreError;
use crate::record::Record;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

const COLUMNS: &str = "id, content, created_at, updated_at";

/// Number of per-record lock stripes.
const LOCK_STRIPES: usize = 16;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File-backed record store.
///
/// Every operation opens its own SQLite connection on the blocking pool and
/// closes it on return, so nothing is held between tool invocations. Writes
/// and reads of the same record are serialized through a striped lock;
/// independent records proceed in parallel.
pub struct RecordStore {
    path: PathBuf,
    locks: Vec<Mutex<()>>,
}

impl RecordStore {
    /// Open (or create) the store at `path`, creating the schema if missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let store = Self {
            path,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        };
        store
            .with_connection(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        tracing::debug!("Opened record store at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new record and return it with its assigned id.
    pub async fn create(&self, content: &str) -> Result<Record, StoreError> {
        let content = content.to_string();
        self.with_connection(move |conn| {
            let now = timestamp_now();
            let record = conn.query_row(
                &format!(
                    "INSERT INTO records (content, created_at, updated_at)
                     VALUES (?1, ?2, ?2) RETURNING {COLUMNS}"
                ),
                params![content, now],
                record_from_row,
            )?;
            Ok(record)
        })
        .await
    }

    pub async fn read(&self, id: i64) -> Result<Option<Record>, StoreError> {
        let _guard = self.lock_for(id).lock().await;
        self.with_connection(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM records WHERE id = ?1"),
                    params![id],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// Replace a record's content. `None` if no record has `id`.
    pub async fn update(&self, id: i64, content: &str) -> Result<Option<Record>, StoreError> {
        let content = content.to_string();
        let _guard = self.lock_for(id).lock().await;
        self.with_connection(move |conn| {
            let record = conn
                .query_row(
                    &format!(
                        "UPDATE records SET content = ?1, updated_at = ?2
                         WHERE id = ?3 RETURNING {COLUMNS}"
                    ),
                    params![content, timestamp_now(), id],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// Remove a record, returning what was removed.
    pub async fn delete(&self, id: i64) -> Result<Option<Record>, StoreError> {
        let _guard = self.lock_for(id).lock().await;
        self.with_connection(move |conn| {
            let record = conn
                .query_row(
                    &format!("DELETE FROM records WHERE id = ?1 RETURNING {COLUMNS}"),
                    params![id],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// All records in id order.
    pub async fn list(&self) -> Result<Vec<Record>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM records ORDER BY id"))?;
            let records = stmt
                .query_map([], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    fn lock_for(&self, id: i64) -> &Mutex<()> {
        &self.locks[id.rem_euclid(LOCK_STRIPES as i64) as usize]
    }

    /// Run `op` against a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connect(&path)?;
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn connect(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(|source| StoreError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        content: row.get(1)?,
        created_at: parse_timestamp(row, 2)?,
        updated_at: parse_timestamp(row, 3)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
