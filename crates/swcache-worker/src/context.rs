//! Shared worker state.

use std::sync::Arc;

use swcache_net::Transport;
use swcache_store::{IdbRecordStore, RecordStore, SqliteRecordStore, StoreFactory};
use tracing::info;

use crate::cache::{CacheStorage, MemoryCacheStorage};
use crate::config::WorkerConfig;
use crate::generation::GenerationStore;
use crate::mutation::MutationCache;
use crate::router::Router;
use crate::strategy::StaticAssetStrategy;
use crate::WorkerError;

/// Everything one worker evaluation shares across events: the current
/// generation, the mutation cache and the router over both.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub generations: Arc<GenerationStore>,
    pub mutations: Arc<MutationCache>,
    pub assets: Arc<StaticAssetStrategy>,
    pub router: Router,
}

impl WorkerContext {
    pub fn builder(config: WorkerConfig, transport: Arc<dyn Transport>) -> WorkerContextBuilder {
        WorkerContextBuilder {
            config,
            transport,
            cache_storage: None,
            record_store: None,
            generation_label: None,
        }
    }
}

/// Builder for [`WorkerContext`].
pub struct WorkerContextBuilder {
    config: WorkerConfig,
    transport: Arc<dyn Transport>,
    cache_storage: Option<Arc<dyn CacheStorage>>,
    record_store: Option<Arc<dyn RecordStore>>,
    generation_label: Option<String>,
}

impl WorkerContextBuilder {
    /// Use `storage` for asset generations instead of a fresh in-memory one.
    pub fn cache_storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.cache_storage = Some(storage);
        self
    }

    /// Use `store` for the mutation cache instead of the configured one.
    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    /// Label the generation explicitly instead of by creation instant.
    pub fn generation_label(mut self, label: impl Into<String>) -> Self {
        self.generation_label = Some(label.into());
        self
    }

    pub fn build(self) -> Result<WorkerContext, WorkerError> {
        let config = self.config;
        config.validate()?;

        let storage: Arc<dyn CacheStorage> = match self.cache_storage {
            Some(storage) => storage,
            None => Arc::new(MemoryCacheStorage::new()),
        };
        let record_store: Arc<dyn RecordStore> = match self.record_store {
            Some(store) => store,
            None => open_record_store(&config)?,
        };

        let mut generations =
            GenerationStore::new(config.location_url()?, storage, self.transport.clone());
        if let Some(label) = self.generation_label {
            generations = generations.with_label(label);
        }
        let generations = Arc::new(generations);

        let mutations = Arc::new(
            MutationCache::new(
                record_store,
                self.transport.clone(),
                config.opt_in_header_name()?,
                config.opt_in_value.clone(),
            )
            .verbose(config.debug),
        );
        let assets = Arc::new(
            StaticAssetStrategy::new(generations.clone(), self.transport).verbose(config.debug),
        );
        let router = Router::new(mutations.clone(), assets.clone());

        info!(
            location = %config.location,
            generation = %generations.label(),
            assets = config.assets.len(),
            "Worker context ready"
        );

        Ok(WorkerContext {
            config,
            generations,
            mutations,
            assets,
            router,
        })
    }
}

fn open_record_store(config: &WorkerConfig) -> Result<Arc<dyn RecordStore>, WorkerError> {
    let settings = &config.mutation_store;
    let schema = settings.store_schema()?;

    let store: Arc<dyn RecordStore> = match settings.path {
        Some(ref path) => Arc::new(SqliteRecordStore::open(
            path,
            &settings.name,
            settings.version,
            schema,
        )?),
        None => Arc::new(IdbRecordStore::new(
            Arc::new(StoreFactory::new()),
            &settings.name,
            settings.version,
            schema,
        )),
    };
    Ok(store)
}
