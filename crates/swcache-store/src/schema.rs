//! Object store schema declarations.
//!
//! A declaration is a comma-separated field list whose first entry is the
//! inline primary key path (`"key,response,timestamp"`). Generated (`++`)
//! and out-of-line keys are not supported.

use crate::{KeyPath, StoreError};

/// Parsed object store declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    /// Object store name.
    pub store: String,
    /// Primary key path.
    pub key_path: KeyPath,
    /// Declared non-key fields; every stored record must carry them.
    pub fields: Vec<String>,
}

impl StoreSchema {
    /// Parse `declaration` for the object store `store`.
    pub fn parse(store: &str, declaration: &str) -> Result<Self, StoreError> {
        if store.is_empty() || !store.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::DataError(format!(
                "invalid object store name: {:?}",
                store
            )));
        }

        let mut parts = declaration.split(',').map(str::trim);
        let primary = parts.next().unwrap_or_default();

        if primary.is_empty() || primary.starts_with("++") {
            return Err(StoreError::DataError(format!(
                "primary key must be an inline field name, got {:?}",
                primary
            )));
        }
        let key_path = KeyPath::new(primary);

        let fields: Vec<String> = parts
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();

        if fields.iter().any(|f| f == primary) {
            return Err(StoreError::DataError(format!(
                "primary key `{}` declared twice",
                primary
            )));
        }

        Ok(Self {
            store: store.to_string(),
            key_path,
            fields,
        })
    }

    /// Check that `record` carries every declared field.
    pub fn validate(&self, record: &serde_json::Value) -> Result<(), StoreError> {
        let object = record
            .as_object()
            .ok_or_else(|| StoreError::DataError("records must be JSON objects".to_string()))?;

        match self.fields.iter().find(|f| !object.contains_key(f.as_str())) {
            Some(missing) => Err(StoreError::DataError(format!(
                "record is missing declared field `{}`",
                missing
            ))),
            None => Ok(()),
        }
    }
}
