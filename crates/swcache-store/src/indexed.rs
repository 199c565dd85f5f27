//! In-memory, IndexedDB-style storage.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{merge_fields, RecordStore, StoreError, StoreSchema};

// ==================== Types ====================

/// Inline key path: the record property holding its primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPath(String);

impl KeyPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract key from value.
    pub fn extract(&self, value: &JsonValue) -> Option<JsonValue> {
        value.get(&self.0).cloned()
    }
}

/// A stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub key: JsonValue,
    pub value: JsonValue,
}

// ==================== ObjectStore ====================

/// An object store.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    /// Store name.
    pub name: String,

    /// Key path.
    pub key_path: KeyPath,

    /// Records by key string.
    records: HashMap<String, Record>,
}

impl ObjectStore {
    /// Create a new object store.
    pub fn new(name: &str, key_path: KeyPath) -> Self {
        Self {
            name: name.to_string(),
            key_path,
            records: HashMap::new(),
        }
    }

    /// Get a record.
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    /// Add a record (fails if key exists).
    pub fn add(&mut self, value: JsonValue) -> Result<String, StoreError> {
        let key = self
            .key_path
            .extract(&value)
            .ok_or_else(|| StoreError::DataError("Could not extract key from value".to_string()))?;
        let key_str = json_to_key_string(&key);

        if self.records.contains_key(&key_str) {
            return Err(StoreError::ConstraintError(format!(
                "Key already exists: {}",
                key_str
            )));
        }

        self.records.insert(key_str.clone(), Record { key, value });
        Ok(key_str)
    }

    /// Modify fields of an existing record. Returns `false` if absent.
    pub fn update(&mut self, key: &str, changes: JsonValue) -> Result<bool, StoreError> {
        match self.records.get_mut(key) {
            Some(record) => {
                merge_fields(&mut record.value, changes, &self.key_path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Count records.
    pub fn count(&self) -> usize {
        self.records.len()
    }
}

// ==================== Database ====================

/// A database.
#[derive(Debug, Clone)]
pub struct Database {
    /// Database name.
    pub name: String,

    /// Version.
    pub version: u64,

    /// Object stores.
    stores: HashMap<String, ObjectStore>,
}

impl Database {
    /// Create a new database.
    pub fn new(name: &str, version: u64) -> Self {
        Self {
            name: name.to_string(),
            version,
            stores: HashMap::new(),
        }
    }

    /// Create object store.
    pub fn create_object_store(&mut self, name: &str, key_path: KeyPath) -> Result<(), StoreError> {
        if self.stores.contains_key(name) {
            return Err(StoreError::ConstraintError(format!(
                "Object store already exists: {}",
                name
            )));
        }

        self.stores
            .insert(name.to_string(), ObjectStore::new(name, key_path));
        Ok(())
    }

    /// Get object store.
    pub fn object_store(&self, name: &str) -> Result<&ObjectStore, StoreError> {
        self.stores
            .get(name)
            .ok_or_else(|| StoreError::NotFoundError(format!("Object store not found: {}", name)))
    }

    /// Get object store mutably.
    pub fn object_store_mut(&mut self, name: &str) -> Result<&mut ObjectStore, StoreError> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFoundError(format!("Object store not found: {}", name)))
    }
}

// ==================== StoreFactory ====================

/// Owner of every in-memory database (the `indexedDB` global).
#[derive(Debug, Default)]
pub struct StoreFactory {
    databases: Arc<RwLock<HashMap<String, Database>>>,
}

impl StoreFactory {
    /// Create a new factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a database, creating or upgrading it as needed.
    ///
    /// `upgrade` runs with the previous version (0 for a new database)
    /// whenever `version` is higher than the stored one.
    pub async fn open<F>(&self, name: &str, version: u64, upgrade: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Database, u64) -> Result<(), StoreError>,
    {
        if version == 0 {
            return Err(StoreError::VersionError("version must be at least 1".to_string()));
        }

        let mut databases = self.databases.write().await;
        let current_version = databases.get(name).map(|db| db.version).unwrap_or(0);

        if version < current_version {
            return Err(StoreError::VersionError(format!(
                "Requested version {} is less than current version {}",
                version, current_version
            )));
        }

        if version > current_version {
            debug!(db = name, old_version = current_version, new_version = version, "Upgrade needed");

            let mut db = databases
                .get(name)
                .cloned()
                .unwrap_or_else(|| Database::new(name, version));
            upgrade(&mut db, current_version)?;
            db.version = version;
            databases.insert(name.to_string(), db);
        }

        Ok(())
    }

    /// Delete a database.
    pub async fn delete_database(&self, name: &str) -> bool {
        self.databases.write().await.remove(name).is_some()
    }

    /// Run a read-only operation on a database.
    pub async fn read<F, R>(&self, name: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Database) -> Result<R, StoreError>,
    {
        let databases = self.databases.read().await;
        let db = databases
            .get(name)
            .ok_or_else(|| StoreError::NotFoundError(format!("Database not found: {}", name)))?;
        f(db)
    }

    /// Run a read-write operation on a database.
    pub async fn write<F, R>(&self, name: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Database) -> Result<R, StoreError>,
    {
        let mut databases = self.databases.write().await;
        let db = databases
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFoundError(format!("Database not found: {}", name)))?;
        f(db)
    }
}

// ==================== IdbRecordStore ====================

/// [`RecordStore`] over one object store of a [`StoreFactory`] database.
///
/// The database is (re)opened on every call, so a deleted database comes
/// back empty with the same name, version and schema.
pub struct IdbRecordStore {
    factory: Arc<StoreFactory>,
    db_name: String,
    version: u64,
    schema: StoreSchema,
}

impl IdbRecordStore {
    pub fn new(factory: Arc<StoreFactory>, db_name: &str, version: u64, schema: StoreSchema) -> Self {
        Self {
            factory,
            db_name: db_name.to_string(),
            version,
            schema,
        }
    }

    /// Number of records currently stored.
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_open().await?;
        let store = &self.schema.store;
        self.factory
            .read(&self.db_name, |db| Ok(db.object_store(store)?.count()))
            .await
    }

    async fn ensure_open(&self) -> Result<(), StoreError> {
        let schema = &self.schema;
        self.factory
            .open(&self.db_name, self.version, |db, _old_version| {
                if db.object_store(&schema.store).is_err() {
                    db.create_object_store(&schema.store, schema.key_path.clone())?;
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl RecordStore for IdbRecordStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        self.ensure_open().await?;
        let store = &self.schema.store;
        self.factory
            .read(&self.db_name, |db| {
                Ok(db.object_store(store)?.get(key).map(|r| r.value.clone()))
            })
            .await
    }

    async fn insert(&self, record: JsonValue) -> Result<(), StoreError> {
        self.schema.validate(&record)?;
        self.ensure_open().await?;
        let store = &self.schema.store;
        self.factory
            .write(&self.db_name, |db| db.object_store_mut(store)?.add(record))
            .await
            .map(|_| ())
    }

    async fn update(&self, key: &str, changes: JsonValue) -> Result<bool, StoreError> {
        self.ensure_open().await?;
        let store = &self.schema.store;
        self.factory
            .write(&self.db_name, |db| db.object_store_mut(store)?.update(key, changes))
            .await
    }

    async fn delete_database(&self) -> Result<(), StoreError> {
        let existed = self.factory.delete_database(&self.db_name).await;
        debug!(db = %self.db_name, existed, "Database deleted");
        Ok(())
    }
}

// ==================== Helpers ====================

/// Convert JSON value to key string.
pub(crate) fn json_to_key_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Array(arr) => {
            let parts: Vec<String> = arr.iter().map(json_to_key_string).collect();
            format!("[{}]", parts.join(","))
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_cache() -> IdbRecordStore {
        let schema = StoreSchema::parse("post_cache", "key,response,timestamp").unwrap();
        IdbRecordStore::new(Arc::new(StoreFactory::new()), "post_cache", 1, schema)
    }

    #[test]
    fn test_key_path_extract() {
        let path = KeyPath::new("id");
        assert_eq!(path.extract(&json!({"id": 42, "name": "test"})).unwrap(), json!(42));
        assert!(path.extract(&json!({"name": "test"})).is_none());
    }

    #[test]
    fn test_object_store_add_rejects_duplicates() {
        let mut store = ObjectStore::new("test", KeyPath::new("id"));

        let key = store.add(json!({"id": "key1", "data": "hello"})).unwrap();
        assert_eq!(key, "key1");

        let again = store.add(json!({"id": "key1", "data": "other"}));
        assert!(matches!(again, Err(StoreError::ConstraintError(_))));
        assert_eq!(store.get("key1").unwrap().value["data"], "hello");
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_object_store_add_requires_key() {
        let mut store = ObjectStore::new("test", KeyPath::new("id"));
        let result = store.add(json!({"data": "a"}));
        assert!(matches!(result, Err(StoreError::DataError(_))));
    }

    #[test]
    fn test_object_store_update_missing() {
        let mut store = ObjectStore::new("test", KeyPath::new("id"));
        assert!(!store.update("nope", json!({"data": 1})).unwrap());
    }

    #[test]
    fn test_database_object_stores() {
        let mut db = Database::new("test", 1);
        db.create_object_store("users", KeyPath::new("id")).unwrap();

        assert!(db.object_store("users").is_ok());
        assert!(db.object_store("other").is_err());
        assert!(db.create_object_store("users", KeyPath::new("id")).is_err());
    }

    #[tokio::test]
    async fn test_factory_open_and_delete() {
        let factory = StoreFactory::new();

        factory
            .open("test", 1, |_, old| {
                assert_eq!(old, 0);
                Ok(())
            })
            .await
            .unwrap();
        assert!(factory.read("test", |db| Ok(db.version)).await.is_ok());

        assert!(factory.delete_database("test").await);
        assert!(matches!(
            factory.read("test", |db| Ok(db.version)).await,
            Err(StoreError::NotFoundError(_))
        ));
    }

    #[tokio::test]
    async fn test_factory_rejects_downgrade() {
        let factory = StoreFactory::new();
        factory.open("test", 2, |_, _| Ok(())).await.unwrap();

        let result = factory.open("test", 1, |_, _| Ok(())).await;
        assert!(matches!(result, Err(StoreError::VersionError(_))));
    }

    #[tokio::test]
    async fn test_factory_upgrade_keeps_records() {
        let factory = StoreFactory::new();
        factory
            .open("test", 1, |db, _| db.create_object_store("s", KeyPath::new("k")))
            .await
            .unwrap();
        factory
            .write("test", |db| db.object_store_mut("s")?.add(json!({"k": "a"})))
            .await
            .unwrap();

        factory
            .open("test", 2, |db, old| {
                assert_eq!(old, 1);
                db.create_object_store("t", KeyPath::new("id"))
            })
            .await
            .unwrap();

        let count = factory
            .read("test", |db| Ok(db.object_store("s")?.count()))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_record_store_insert_then_conflict_then_update() {
        let store = post_cache();
        let record = json!({"key": "k", "response": {"status": 200}, "timestamp": 1});

        store.insert(record.clone()).await.unwrap();
        let conflict = store.insert(record).await.unwrap_err();
        assert!(conflict.is_constraint());

        let updated = store
            .update("k", json!({"key": "k", "response": {"status": 201}, "timestamp": 2}))
            .await
            .unwrap();
        assert!(updated);

        let stored = store.get("k").await.unwrap().unwrap();
        assert_eq!(stored["response"]["status"], 201);
        assert_eq!(stored["timestamp"], 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_store_rejects_undeclared_shape() {
        let store = post_cache();
        let result = store.insert(json!({"key": "k"})).await;
        assert!(matches!(result, Err(StoreError::DataError(_))));
    }

    #[tokio::test]
    async fn test_record_store_reopens_after_delete() {
        let store = post_cache();
        store
            .insert(json!({"key": "k", "response": {}, "timestamp": 1}))
            .await
            .unwrap();

        store.delete_database().await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
