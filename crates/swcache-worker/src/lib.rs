//! # swcache worker
//!
//! Offline caching worker for one web origin.
//!
//! ## Features
//!
//! - **Generations**: versioned asset caches, installed atomically from a manifest
//! - **Static assets**: cache-first for same-origin GETs, with write-back and an
//!   offline fallback to the root document for navigations
//! - **Mutation cache**: opt-in response cache for non-idempotent requests, keyed by
//!   a fingerprint of the whole request
//! - **Messages**: `skipWaiting` and `cleanIndexedDB`
//!
//! ## Architecture
//!
//! ```text
//! Worker (install / activate / fetch / message)
//!     │
//!     └── WorkerContext
//!             ├── GenerationStore ── CacheStorage
//!             │                          └── generation label → URL → AssetEntry
//!             ├── MutationCache ── RecordStore
//!             │                       └── fingerprint → CachedRequestRecord
//!             └── Router
//!                     ├── MutationCache        (opt-in header, not OPTIONS)
//!                     ├── StaticAssetStrategy  (GET, same origin)
//!                     └── passthrough
//! ```

/// Log a per-request decision at debug level when `$verbose`, else at trace.
macro_rules! decision {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod keepalive;
pub mod mutation;
pub mod router;
pub mod serialize;
pub mod strategy;
pub mod worker;

pub use cache::{AssetEntry, CacheStorage, MemoryCacheStorage};
pub use config::{MutationStoreConfig, WorkerConfig};
pub use context::{WorkerContext, WorkerContextBuilder};
pub use error::WorkerError;
pub use fingerprint::{fingerprint, RequestFingerprint};
pub use generation::{ActivationReport, GenerationStore};
pub use keepalive::ExtendableEvent;
pub use mutation::{CachedRequestRecord, MutationCache};
pub use router::{ResponseFuture, Route, RouteKind, Router};
pub use serialize::{
    deserialize_response, serialize_headers, serialize_request, serialize_response, BodyEncoding,
    SerializedRequest, SerializedResponse,
};
pub use strategy::StaticAssetStrategy;
pub use worker::{Worker, WorkerEvent, WorkerId, WorkerMessage, WorkerState};
