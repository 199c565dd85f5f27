//! Worker configuration.

use std::path::{Path, PathBuf};

use http::HeaderName;
use serde::{Deserialize, Serialize};
use swcache_store::StoreSchema;
use url::Url;

use crate::WorkerError;

/// Worker configuration, usually read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// URL of the worker script; manifest entries resolve against it and
    /// its origin is the origin served from cache.
    pub location: String,

    /// Assets pre-cached on install. The origin root is always added.
    pub assets: Vec<String>,

    /// Request header that opts a request into the mutation cache.
    pub opt_in_header: String,

    /// Value the opt-in header must carry.
    pub opt_in_value: String,

    /// Backing store of the mutation cache.
    pub mutation_store: MutationStoreConfig,

    /// Log every routing decision at debug level.
    pub debug: bool,
}

/// Backing store settings for the mutation cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationStoreConfig {
    /// Database name.
    pub name: String,

    /// Database version.
    pub version: u64,

    /// Object store name.
    pub store: String,

    /// Object store declaration, primary key first.
    pub schema: String,

    /// SQLite file; records stay in memory when unset.
    pub path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            location: "http://localhost/sw.js".to_string(),
            assets: Vec::new(),
            opt_in_header: "X-Custom-Header".to_string(),
            opt_in_value: "cache".to_string(),
            mutation_store: MutationStoreConfig::default(),
            debug: false,
        }
    }
}

impl Default for MutationStoreConfig {
    fn default() -> Self {
        Self {
            name: "post_cache".to_string(),
            version: 1,
            store: "post_cache".to_string(),
            schema: "key,response,timestamp".to_string(),
            path: None,
        }
    }
}

impl WorkerConfig {
    /// Config for a worker served from `location` with the given manifest.
    pub fn new(location: impl Into<String>, assets: Vec<String>) -> Self {
        Self {
            location: location.into(),
            assets,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, WorkerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkerError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every field that can be malformed.
    pub fn validate(&self) -> Result<(), WorkerError> {
        self.location_url()?;
        self.opt_in_header_name()?;
        self.mutation_store.store_schema()?;
        if self.opt_in_value.is_empty() {
            return Err(WorkerError::Config("opt_in_value must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parsed worker location.
    pub fn location_url(&self) -> Result<Url, WorkerError> {
        let url = Url::parse(&self.location)?;
        if url.cannot_be_a_base() {
            return Err(WorkerError::Config(format!(
                "location {} cannot resolve relative URLs",
                url
            )));
        }
        Ok(url)
    }

    /// Parsed opt-in header name.
    pub fn opt_in_header_name(&self) -> Result<HeaderName, WorkerError> {
        HeaderName::from_bytes(self.opt_in_header.as_bytes())
            .map_err(|e| WorkerError::Config(format!("opt_in_header: {}", e)))
    }
}

impl MutationStoreConfig {
    /// Parsed object store declaration.
    pub fn store_schema(&self) -> Result<StoreSchema, WorkerError> {
        Ok(StoreSchema::parse(&self.store, &self.schema)?)
    }
}
