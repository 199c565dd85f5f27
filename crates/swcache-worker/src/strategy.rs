//! Cache-first strategy for same-origin static assets.

use std::sync::Arc;

use http::{header, Method, StatusCode};
use swcache_net::{Request, Response, Transport};
use tracing::{debug, trace, warn};

use crate::generation::{GenerationStore, ROOT_ENTRY};
use crate::keepalive::ExtendableEvent;
use crate::WorkerError;

/// Serves same-origin GET requests from the current generation, filling it
/// from the network on a miss.
pub struct StaticAssetStrategy {
    generations: Arc<GenerationStore>,
    transport: Arc<dyn Transport>,
    verbose: bool,
}

impl StaticAssetStrategy {
    pub fn new(generations: Arc<GenerationStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            generations,
            transport,
            verbose: false,
        }
    }

    /// Log every decision at debug level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// GET requests to the worker's own origin.
    pub fn is_eligible(&self, request: &Request) -> bool {
        request.method == Method::GET && request.is_same_origin(self.generations.location())
    }

    /// Answer `request`.
    ///
    /// `Ok(None)` means the network was unreachable and no fallback applied.
    pub async fn handle(
        &self,
        request: Request,
        keep_alive: &ExtendableEvent,
    ) -> Result<Option<Response>, WorkerError> {
        let url = request.url.clone();

        if let Some(entry) = self.generations.lookup(&url).await? {
            decision!(self.verbose, url = %url, "Asset served from cache");
            return Ok(Some(entry.to_response()));
        }

        let navigation = request.is_navigation();
        let mut response = match self.transport.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Asset fetch failed");
                if !navigation {
                    return Ok(None);
                }
                let root = self.generations.resolve(ROOT_ENTRY)?;
                let fallback = self.generations.lookup(&root).await?;
                decision!(
                    self.verbose,
                    url = %url,
                    found = fallback.is_some(),
                    "Offline navigation, falling back to root document"
                );
                return Ok(fallback.map(|entry| entry.to_response()));
            }
        };

        if !response.ok() {
            decision!(self.verbose, url = %url, status = %response.status, "Asset not cached");
            return Ok(Some(response));
        }
        if !is_storable(&response) {
            decision!(self.verbose, url = %url, status = %response.status, "Partial or unstorable asset not cached");
            return Ok(Some(response));
        }

        let copy = response.try_clone()?;
        let generations = self.generations.clone();
        keep_alive.wait_until(async move {
            if let Err(e) = generations.write_back(&url, copy).await {
                warn!(url = %url, error = %e, "Asset write-back failed");
            } else {
                trace!(url = %url, "Asset written back");
            }
        });

        Ok(Some(response))
    }
}

/// Partial content and `Vary: *` responses never enter a generation.
fn is_storable(response: &Response) -> bool {
    if response.status == StatusCode::PARTIAL_CONTENT {
        return false;
    }
    !response
        .headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|field| field.trim() == "*")
}
