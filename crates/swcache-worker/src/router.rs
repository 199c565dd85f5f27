//! Per-request dispatch.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use swcache_net::{Request, Response};

use crate::keepalive::ExtendableEvent;
use crate::mutation::MutationCache;
use crate::strategy::StaticAssetStrategy;
use crate::WorkerError;

/// Pending answer to an intercepted request.
pub type ResponseFuture = BoxFuture<'static, Result<Option<Response>, WorkerError>>;

/// What the worker does with an intercepted request.
pub enum Route {
    /// Answer with the future's response, awaited exactly once.
    Respond(ResponseFuture),
    /// Let the request reach the network untouched.
    Passthrough(Request),
}

impl Route {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Route::Passthrough(_))
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Respond(_) => f.write_str("Respond(..)"),
            Route::Passthrough(request) => f.debug_tuple("Passthrough").field(&request.url).finish(),
        }
    }
}

/// Handler chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Mutation,
    StaticAsset,
    Passthrough,
}

/// Classifies intercepted requests and hands them to their handler.
pub struct Router {
    mutations: Arc<MutationCache>,
    assets: Arc<StaticAssetStrategy>,
}

impl Router {
    pub fn new(mutations: Arc<MutationCache>, assets: Arc<StaticAssetStrategy>) -> Self {
        Self { mutations, assets }
    }

    /// Opted-in mutations first, then same-origin GETs.
    pub fn classify(&self, request: &Request) -> RouteKind {
        if self.mutations.is_eligible(request) {
            RouteKind::Mutation
        } else if self.assets.is_eligible(request) {
            RouteKind::StaticAsset
        } else {
            RouteKind::Passthrough
        }
    }

    /// Route `request`; background writes are attached to `keep_alive`.
    pub fn route(&self, request: Request, keep_alive: &ExtendableEvent) -> Route {
        match self.classify(&request) {
            RouteKind::Mutation => {
                let mutations = self.mutations.clone();
                let keep_alive = keep_alive.clone();
                Route::Respond(
                    async move { mutations.handle(request, &keep_alive).await.map(Some) }.boxed(),
                )
            }
            RouteKind::StaticAsset => {
                let assets = self.assets.clone();
                let keep_alive = keep_alive.clone();
                Route::Respond(async move { assets.handle(request, &keep_alive).await }.boxed())
            }
            RouteKind::Passthrough => Route::Passthrough(request),
        }
    }
}
