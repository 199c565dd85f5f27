//! Worker errors.

use swcache_net::NetError;
use swcache_store::StoreError;
use thiserror::Error;

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Whether the network was unreachable (as opposed to a local failure).
    pub fn is_network(&self) -> bool {
        matches!(self, WorkerError::Network(_))
    }
}

impl From<url::ParseError> for WorkerError {
    fn from(e: url::ParseError) -> Self {
        WorkerError::InvalidUrl(e.to_string())
    }
}
