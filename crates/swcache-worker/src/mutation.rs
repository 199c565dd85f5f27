//! Response cache for opted-in mutation requests.

use std::sync::Arc;

use http::{HeaderName, Method};
use serde::{Deserialize, Serialize};
use swcache_common::now_millis;
use swcache_net::{Request, Response, Transport};
use swcache_store::{RecordStore, StoreError};
use tracing::{debug, trace, warn};

use crate::fingerprint::{fingerprint, RequestFingerprint};
use crate::keepalive::ExtendableEvent;
use crate::serialize::{deserialize_response, serialize_request, serialize_response, SerializedResponse};
use crate::WorkerError;

/// One stored response, keyed by request fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRequestRecord {
    pub key: String,
    pub response: SerializedResponse,
    /// Written at (ms since epoch).
    pub timestamp: i64,
}

/// Get-or-populate cache for requests carrying the opt-in header.
pub struct MutationCache {
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    opt_in_header: HeaderName,
    opt_in_value: String,
    verbose: bool,
}

impl MutationCache {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        opt_in_header: HeaderName,
        opt_in_value: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            opt_in_header,
            opt_in_value: opt_in_value.into(),
            verbose: false,
        }
    }

    /// Log every decision at debug level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Requests other than `OPTIONS` whose opt-in header carries the
    /// expected value.
    pub fn is_eligible(&self, request: &Request) -> bool {
        request.method != Method::OPTIONS
            && request
                .headers
                .get(&self.opt_in_header)
                .is_some_and(|v| v.as_bytes() == self.opt_in_value.as_bytes())
    }

    /// Answer `request` from the store, or from the network while storing
    /// the response in the background.
    pub async fn handle(
        &self,
        mut request: Request,
        keep_alive: &ExtendableEvent,
    ) -> Result<Response, WorkerError> {
        let key = fingerprint(&serialize_request(&mut request).await?);

        if let Some(stored) = self.lookup(&key).await? {
            decision!(self.verbose, url = %request.url, "Mutation served from cache");
            return deserialize_response(stored.response);
        }

        let url = request.url.clone();
        let outbound = request.try_clone()?;
        let mut response = self.transport.fetch(outbound).await?;
        decision!(self.verbose, url = %url, status = %response.status, "Mutation fetched");

        let mut copy = response.try_clone()?;
        let store = self.store.clone();
        keep_alive.wait_until(async move {
            let record = match serialize_response(&mut copy).await {
                Ok(response) => CachedRequestRecord {
                    key: key.into_string(),
                    response,
                    timestamp: now_millis(),
                },
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to serialize mutation response");
                    return;
                }
            };
            if let Err(e) = upsert(store.as_ref(), record).await {
                warn!(url = %url, error = %e, "Failed to store mutation response");
            } else {
                trace!(url = %url, "Mutation response stored");
            }
        });

        Ok(response)
    }

    /// Stored record for `key`. Undecodable records read as absent.
    pub async fn lookup(&self, key: &RequestFingerprint) -> Result<Option<CachedRequestRecord>, WorkerError> {
        let Some(value) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable mutation record");
                Ok(None)
            }
        }
    }

    /// Delete the backing database. It is recreated empty on next use.
    pub async fn purge(&self) -> Result<(), WorkerError> {
        self.store.delete_database().await?;
        debug!("Mutation cache purged");
        Ok(())
    }
}

/// Insert `record`, or overwrite the existing record under its key.
async fn upsert(store: &dyn RecordStore, record: CachedRequestRecord) -> Result<(), WorkerError> {
    let value = serde_json::to_value(&record)?;
    match store.insert(value.clone()).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_constraint() => {
            if !store.update(&record.key, value).await? {
                return Err(StoreError::NotFoundError(record.key).into());
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
