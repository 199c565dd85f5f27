//! # swcache store
//!
//! Keyed record stores for the mutation response cache.
//!
//! ## Features
//!
//! - **RecordStore**: `get`, `insert` (rejects existing keys), `update`, `delete_database`
//! - **IdbRecordStore**: in-memory, IndexedDB-style databases and object stores
//! - **SqliteRecordStore**: the same contract persisted in SQLite
//!
//! ## Architecture
//!
//! ```text
//! RecordStore (trait)
//!     ├── IdbRecordStore ── StoreFactory
//!     │                        └── Database (name, version)
//!     │                                └── ObjectStore
//!     │                                        └── key → record
//!     └── SqliteRecordStore ── one table per object store
//! ```
//!
//! Records are JSON objects. The primary key is read from the record through
//! the schema's key path.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod indexed;
pub mod schema;
pub mod sqlite;

pub use indexed::{Database, IdbRecordStore, KeyPath, ObjectStore, StoreFactory};
pub use schema::StoreSchema;
pub use sqlite::SqliteRecordStore;

// ==================== Errors ====================

/// Record store errors, named after their IndexedDB counterparts.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Constraint error: {0}")]
    ConstraintError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid state: {0}")]
    InvalidStateError(String),

    #[error("Version error: {0}")]
    VersionError(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    UnknownError(String),
}

impl StoreError {
    /// Whether the error reports an already existing key.
    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::ConstraintError(_))
    }
}

// ==================== RecordStore ====================

/// A named, versioned keyed store.
///
/// Each call is atomic with respect to other calls on the same store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the record stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError>;

    /// Insert a new record; fails with [`StoreError::ConstraintError`] when
    /// its key already exists.
    async fn insert(&self, record: JsonValue) -> Result<(), StoreError>;

    /// Overwrite the fields of the record stored under `key` with those of
    /// `changes`. Returns `false` when no such record exists.
    async fn update(&self, key: &str, changes: JsonValue) -> Result<bool, StoreError>;

    /// Drop the whole database. The next call recreates it empty.
    async fn delete_database(&self) -> Result<(), StoreError>;
}

// ==================== Helpers ====================

/// Merge `changes` into `target` field by field.
pub(crate) fn merge_fields(
    target: &mut JsonValue,
    changes: JsonValue,
    key_path: &KeyPath,
) -> Result<(), StoreError> {
    let (JsonValue::Object(target), JsonValue::Object(changes)) = (target, changes) else {
        return Err(StoreError::DataError("records must be JSON objects".to_string()));
    };

    let path = key_path.as_str();
    if let (Some(new), Some(old)) = (changes.get(path), target.get(path)) {
        if new != old {
            return Err(StoreError::DataError(format!(
                "cannot change primary key `{}`",
                path
            )));
        }
    }

    for (field, value) in changes {
        target.insert(field, value);
    }
    Ok(())
}
