//! SQLite-backed record store.
//!
//! Every object store maps to a table `<database>__<store>` holding the key
//! string and the record as JSON text. Database versions are tracked in
//! `swcache_databases`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::indexed::json_to_key_string;
use crate::{merge_fields, RecordStore, StoreError, StoreSchema};

/// Naming of one object store inside the SQLite file.
#[derive(Debug, Clone)]
struct Layout {
    db_name: String,
    version: u64,
    table: String,
    schema: StoreSchema,
}

/// [`RecordStore`] persisted in a SQLite database.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    layout: Layout,
    /// Table and version row are known to exist. Cleared by `delete_database`.
    opened: Arc<AtomicBool>,
}

impl SqliteRecordStore {
    /// Open (or create) the store in the SQLite file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        db_name: &str,
        version: u64,
        schema: StoreSchema,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, db_name, version, schema)
    }

    /// Open the store in a private in-memory database.
    pub fn open_in_memory(
        db_name: &str,
        version: u64,
        schema: StoreSchema,
    ) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, db_name, version, schema)
    }

    fn with_connection(
        conn: Connection,
        db_name: &str,
        version: u64,
        schema: StoreSchema,
    ) -> Result<Self, StoreError> {
        if db_name.is_empty() || !db_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::DataError(format!("invalid database name: {:?}", db_name)));
        }
        if version == 0 {
            return Err(StoreError::VersionError("version must be at least 1".to_string()));
        }

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS swcache_databases (
                 name TEXT PRIMARY KEY NOT NULL,
                 version INTEGER NOT NULL
             );",
        )?;

        let layout = Layout {
            db_name: db_name.to_string(),
            version,
            table: format!("{}__{}", db_name, schema.store),
            schema,
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            layout,
            opened: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Number of records currently stored.
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.call(|conn, layout| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"", layout.table),
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    /// Run `f` against the opened store on the blocking pool.
    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection, &Layout) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let opened = Arc::clone(&self.opened);
        self.run_blocking(move |conn, layout| {
            if !opened.load(Ordering::Acquire) {
                ensure_open(conn, layout)?;
                opened.store(true, Ordering::Release);
            }
            f(conn, layout)
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool, holding its lock.
    async fn run_blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection, &Layout) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let layout = self.layout.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::InvalidStateError("connection lock poisoned".to_string()))?;
            f(&conn, &layout)
        })
        .await
        .map_err(|e| StoreError::UnknownError(e.to_string()))?
    }
}

/// Create the table and record the version if needed.
fn ensure_open(conn: &Connection, layout: &Layout) -> Result<(), StoreError> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT version FROM swcache_databases WHERE name = ?1",
            [&layout.db_name],
            |row| row.get(0),
        )
        .optional()?;
    let current = current.unwrap_or(0) as u64;

    if layout.version < current {
        return Err(StoreError::VersionError(format!(
            "Requested version {} is less than current version {}",
            layout.version, current
        )));
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (
             key TEXT PRIMARY KEY NOT NULL,
             value TEXT NOT NULL
         );",
        layout.table
    ))?;

    if layout.version > current {
        debug!(db = %layout.db_name, old_version = current, new_version = layout.version, "Upgrade needed");
        conn.execute(
            "INSERT INTO swcache_databases (name, version) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET version = excluded.version",
            params![layout.db_name, layout.version as i64],
        )?;
    }

    Ok(())
}

fn record_key(record: &JsonValue, layout: &Layout) -> Result<String, StoreError> {
    layout
        .schema
        .key_path
        .extract(record)
        .map(|k| json_to_key_string(&k))
        .ok_or_else(|| StoreError::DataError("Could not extract key from value".to_string()))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let key = key.to_string();
        self.call(move |conn, layout| {
            let text: Option<String> = conn
                .query_row(
                    &format!("SELECT value FROM \"{}\" WHERE key = ?1", layout.table),
                    [&key],
                    |row| row.get(0),
                )
                .optional()?;
            text.map(|t| serde_json::from_str(&t).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn insert(&self, record: JsonValue) -> Result<(), StoreError> {
        self.layout.schema.validate(&record)?;
        self.call(move |conn, layout| {
            let key = record_key(&record, layout)?;
            let result = conn.execute(
                &format!("INSERT INTO \"{}\" (key, value) VALUES (?1, ?2)", layout.table),
                params![key, serde_json::to_string(&record)?],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(StoreError::ConstraintError(format!("Key already exists: {}", key)))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update(&self, key: &str, changes: JsonValue) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.call(move |conn, layout| {
            let tx = conn.unchecked_transaction()?;

            let text: Option<String> = tx
                .query_row(
                    &format!("SELECT value FROM \"{}\" WHERE key = ?1", layout.table),
                    [&key],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(text) = text else {
                return Ok(false);
            };

            let mut record: JsonValue = serde_json::from_str(&text)?;
            merge_fields(&mut record, changes, &layout.schema.key_path)?;

            tx.execute(
                &format!("UPDATE \"{}\" SET value = ?2 WHERE key = ?1", layout.table),
                params![key, serde_json::to_string(&record)?],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn delete_database(&self) -> Result<(), StoreError> {
        let opened = Arc::clone(&self.opened);
        self.run_blocking(move |conn, layout| {
            opened.store(false, Ordering::Release);
            conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", layout.table))?;
            conn.execute(
                "DELETE FROM swcache_databases WHERE name = ?1",
                [&layout.db_name],
            )?;
            debug!(db = %layout.db_name, "Database deleted");
            Ok(())
        })
        .await
    }
}
