//! Cache generations.
//!
//! Every worker evaluation owns one generation, labelled with the instant
//! it was created. Install fills the generation from the asset manifest;
//! activate deletes every other generation.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{join_all, try_join_all};
use swcache_common::iso_instant;
use swcache_net::{Request, Response, Transport};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{cache_key, AssetEntry, CacheStorage};
use crate::WorkerError;

/// Manifest entry for the origin root, always installed.
pub const ROOT_ENTRY: &str = "./";

/// Outcome of deleting superseded generations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Generations removed.
    pub deleted: Vec<String>,
    /// Generations that could not be removed.
    pub failed: Vec<String>,
}

/// The current cache generation.
pub struct GenerationStore {
    label: String,
    location: Url,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn Transport>,
}

impl GenerationStore {
    /// Create the generation for a worker served from `location`.
    pub fn new(location: Url, storage: Arc<dyn CacheStorage>, transport: Arc<dyn Transport>) -> Self {
        Self {
            label: iso_instant(Utc::now()),
            location,
            storage,
            transport,
        }
    }

    /// Replace the generated label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Label of this generation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Worker location every manifest entry resolves against.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Resolve a manifest entry against the worker location.
    pub fn resolve(&self, entry: &str) -> Result<Url, WorkerError> {
        Ok(self.location.join(entry)?)
    }

    /// Fetch every manifest entry plus the origin root and store them in
    /// this generation.
    ///
    /// Nothing is written unless every fetch succeeds with a 2xx status.
    pub async fn install(&self, manifest: &[String]) -> Result<(), WorkerError> {
        let mut urls: Vec<Url> = Vec::with_capacity(manifest.len() + 1);
        for entry in manifest.iter().map(String::as_str).chain([ROOT_ENTRY]) {
            let url = self.resolve(entry)?;
            if !urls.iter().any(|u| cache_key(u) == cache_key(&url)) {
                urls.push(url);
            }
        }

        info!(generation = %self.label, assets = urls.len(), "Installing generation");

        let entries = try_join_all(urls.iter().map(|url| self.fetch_asset(url))).await?;
        self.storage.put_all(&self.label, entries).await?;

        info!(generation = %self.label, "Generation installed");
        Ok(())
    }

    async fn fetch_asset(&self, url: &Url) -> Result<AssetEntry, WorkerError> {
        let response = self
            .transport
            .fetch(Request::get(url.clone()))
            .await
            .map_err(|e| WorkerError::InstallFailed(format!("{}: {}", url, e)))?;

        if !response.ok() {
            return Err(WorkerError::InstallFailed(format!(
                "{} returned {}",
                url, response.status
            )));
        }

        AssetEntry::from_response(url, response).await
    }

    /// Delete every generation whose label does not start with this one.
    ///
    /// Individual deletion failures are logged and reported, never raised.
    pub async fn activate(&self) -> Result<ActivationReport, WorkerError> {
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| !name.starts_with(&self.label))
            .collect();

        let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;

        let mut report = ActivationReport::default();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(true) => {
                    debug!(generation = %name, "Deleted superseded generation");
                    report.deleted.push(name);
                }
                Ok(false) => debug!(generation = %name, "Generation already gone"),
                Err(e) => {
                    warn!(generation = %name, error = %e, "Failed to delete generation");
                    report.failed.push(name);
                }
            }
        }

        info!(
            generation = %self.label,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Generation activated"
        );
        Ok(report)
    }

    /// Store `response` for `url` in this generation.
    ///
    /// Once the generation has been deleted by a newer worker's activation
    /// the response is dropped instead of recreating it.
    pub async fn write_back(&self, url: &Url, response: Response) -> Result<(), WorkerError> {
        let entry = AssetEntry::from_response(url, response).await?;
        if !self.storage.put_existing(&self.label, entry).await? {
            debug!(generation = %self.label, url = %url, "Generation gone, write-back dropped");
        }
        Ok(())
    }

    /// Stored entry for `url` in this generation.
    pub async fn lookup(&self, url: &Url) -> Result<Option<AssetEntry>, WorkerError> {
        self.storage.match_in(&self.label, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::testing::MockTransport;
    use http::StatusCode;

    fn location() -> Url {
        Url::parse("https://ex.com/sw.js").unwrap()
    }

    fn setup(transport: &Arc<MockTransport>) -> (Arc<MemoryCacheStorage>, GenerationStore) {
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = GenerationStore::new(location(), storage.clone(), transport.clone());
        (storage, store)
    }

    #[test]
    fn test_label_is_iso_instant() {
        let transport = Arc::new(MockTransport::new());
        let (_, store) = setup(&transport);
        let label = store.label();
        assert_eq!(label.len(), "2026-10-19T08:30:00.123Z".len());
        assert!(label.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_install_adds_root_and_dedupes() {
        let transport = Arc::new(MockTransport::new());
        transport.serve("https://ex.com/", 200, "root");
        transport.serve("https://ex.com/app.js", 200, "js");
        let (storage, store) = setup(&transport);

        let manifest = vec!["/app.js".to_string(), "app.js".to_string(), "/".to_string()];
        store.install(&manifest).await.unwrap();

        assert_eq!(
            storage.urls(store.label()).await,
            vec!["https://ex.com/", "https://ex.com/app.js"]
        );
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let transport = Arc::new(MockTransport::new());
        transport.serve("https://ex.com/", 200, "root");
        transport.serve("https://ex.com/a.css", 200, "css");
        transport.serve("https://ex.com/missing.js", 404, "gone");
        let (storage, store) = setup(&transport);

        let manifest = vec!["/a.css".to_string(), "/missing.js".to_string()];
        let err = store.install(&manifest).await.unwrap_err();

        assert!(matches!(err, WorkerError::InstallFailed(_)));
        assert!(!storage.has(store.label()).await.unwrap());
    }

    #[tokio::test]
    async fn test_install_fails_offline() {
        let transport = Arc::new(MockTransport::new());
        transport.set_online(false);
        let (storage, store) = setup(&transport);

        assert!(store.install(&[]).await.is_err());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_keeps_only_current_prefix() {
        let transport = Arc::new(MockTransport::new());
        let (storage, store) = setup(&transport);
        let store = store.with_label("gen-2");

        storage.put_all("gen-1", vec![]).await.unwrap();
        storage.put_all("gen-2", vec![]).await.unwrap();
        storage.put_all("gen-2-extra", vec![]).await.unwrap();
        storage.put_all("other", vec![]).await.unwrap();

        let report = store.activate().await.unwrap();

        assert_eq!(report.deleted, vec!["gen-1", "other"]);
        assert!(report.failed.is_empty());
        assert_eq!(storage.keys().await.unwrap(), vec!["gen-2", "gen-2-extra"]);
    }

    #[tokio::test]
    async fn test_activate_survives_failed_delete() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(FlakyStorage::failing_on("bad"));
        let store = GenerationStore::new(location(), storage.clone(), transport).with_label("gen-3");

        for name in ["gen-1", "bad", "gen-2", "gen-3"] {
            storage.inner.put_all(name, vec![]).await.unwrap();
        }

        let report = store.activate().await.unwrap();

        assert_eq!(report.deleted, vec!["gen-1", "gen-2"]);
        assert_eq!(report.failed, vec!["bad"]);
        assert_eq!(storage.keys().await.unwrap(), vec!["bad", "gen-3"]);
    }

    #[tokio::test]
    async fn test_write_back_and_lookup() {
        let transport = Arc::new(MockTransport::new());
        let (storage, store) = setup(&transport);
        let url = Url::parse("https://ex.com/late.js").unwrap();
        storage.put_all(store.label(), vec![]).await.unwrap();

        assert!(store.lookup(&url).await.unwrap().is_none());

        store
            .write_back(&url, Response::new(StatusCode::OK, "v1"))
            .await
            .unwrap();
        store
            .write_back(&url, Response::new(StatusCode::OK, "v2"))
            .await
            .unwrap();

        let entry = store.lookup(&url).await.unwrap().unwrap();
        assert_eq!(entry.to_response().text().await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_write_back_after_deletion_does_not_recreate() {
        let transport = Arc::new(MockTransport::new());
        let storage = Arc::new(MemoryCacheStorage::new());
        let old = GenerationStore::new(location(), storage.clone(), transport.clone()).with_label("G1");
        let new = GenerationStore::new(location(), storage.clone(), transport).with_label("G2");
        storage.put_all("G1", vec![]).await.unwrap();
        storage.put_all("G2", vec![]).await.unwrap();

        new.activate().await.unwrap();
        let url = Url::parse("https://ex.com/late.js").unwrap();
        old.write_back(&url, Response::new(StatusCode::OK, "late"))
            .await
            .unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["G2"]);
        assert!(old.lookup(&url).await.unwrap().is_none());
    }

    /// Storage whose `delete` fails for one cache name.
    struct FlakyStorage {
        inner: MemoryCacheStorage,
        failing: String,
    }

    impl FlakyStorage {
        fn failing_on(name: &str) -> Self {
            Self {
                inner: MemoryCacheStorage::new(),
                failing: name.to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl CacheStorage for FlakyStorage {
        async fn keys(&self) -> Result<Vec<String>, WorkerError> {
            self.inner.keys().await
        }

        async fn has(&self, name: &str) -> Result<bool, WorkerError> {
            self.inner.has(name).await
        }

        async fn delete(&self, name: &str) -> Result<bool, WorkerError> {
            if name == self.failing {
                return Err(WorkerError::CacheError(format!("cannot delete {}", name)));
            }
            self.inner.delete(name).await
        }

        async fn match_in(&self, name: &str, url: &Url) -> Result<Option<AssetEntry>, WorkerError> {
            self.inner.match_in(name, url).await
        }

        async fn put_all(&self, name: &str, entries: Vec<AssetEntry>) -> Result<(), WorkerError> {
            self.inner.put_all(name, entries).await
        }

        async fn put_existing(&self, name: &str, entry: AssetEntry) -> Result<bool, WorkerError> {
            self.inner.put_existing(name, entry).await
        }
    }
}
