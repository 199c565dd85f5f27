//! # swcache net
//!
//! Fetch-style requests and responses plus the transport that performs real
//! network fetches.
//!
//! ## Design Goals
//!
//! 1. **Single-read bodies**: reading a body consumes it; duplicates are explicit
//! 2. **Fetch semantics**: request mode, credentials, cache and redirect modes
//! 3. **Pluggable transport**: the caching layer only sees the [`Transport`] trait

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod body;
pub mod modes;
pub mod transport;

pub use body::{Body, BodySender};
pub use modes::{CacheMode, CredentialsMode, RedirectMode, RequestMode};
pub use transport::{HttpTransport, LoaderConfig, Transport};

/// Referrer value of a request that has not been given one explicitly.
pub const CLIENT_REFERRER: &str = "about:client";

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Body unavailable: {0}")]
    BodyUnavailable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// A copy of this error for the second branch of a teed body.
    pub(crate) fn duplicate(&self) -> NetError {
        match self {
            NetError::RequestFailed(m) => NetError::RequestFailed(m.clone()),
            NetError::InvalidMode(m) => NetError::InvalidMode(m.clone()),
            NetError::BodyUnavailable(m) => NetError::BodyUnavailable(m.clone()),
            NetError::HttpError(e) => NetError::RequestFailed(e.to_string()),
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// An intercepted or outgoing request.
#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
    pub cache: CacheMode,
    pub redirect: RedirectMode,
    /// Referrer URL, `about:client`, or empty for no referrer.
    pub referrer: String,
    pub body: Body,
}

impl Request {
    /// Create a request with default modes and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
            credentials: CredentialsMode::default(),
            cache: CacheMode::default(),
            redirect: RedirectMode::default(),
            referrer: CLIENT_REFERRER.to_string(),
            body: Body::Empty,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: impl Into<Body>) -> Self {
        Self::new(Method::POST, url).body(body)
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the credentials mode.
    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the cache mode.
    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Set the redirect mode.
    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = redirect;
        self
    }

    /// Set referrer.
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Whether the method may carry a body.
    pub fn allows_body(&self) -> bool {
        self.method != Method::GET && self.method != Method::HEAD
    }

    /// Whether this request is a top-level page load.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Whether this request targets the same origin as `other`.
    pub fn is_same_origin(&self, other: &Url) -> bool {
        self.url.origin() == other.origin()
    }

    /// Header value as a string, if present and printable.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Produce an independent copy whose body can be read separately.
    ///
    /// The copy gets a fresh [`RequestId`].
    pub fn try_clone(&mut self) -> Result<Request, NetError> {
        Ok(Request {
            id: RequestId::new(),
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            mode: self.mode,
            credentials: self.credentials,
            cache: self.cache,
            redirect: self.redirect,
            referrer: self.referrer.clone(),
            body: self.body.try_clone()?,
        })
    }
}

/// A network or cached response.
#[derive(Debug)]
pub struct Response {
    /// Final URL, absent for synthesized responses.
    pub url: Option<Url>,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Response {
    /// Create a response with the canonical reason phrase as status text.
    pub fn new(status: StatusCode, body: impl Into<Body>) -> Self {
        Self {
            url: None,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Override the status text.
    pub fn status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    /// Check if response was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Header value as a string, if present and printable.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Produce an independent copy whose body can be read separately.
    pub fn try_clone(&mut self) -> Result<Response, NetError> {
        Ok(Response {
            url: self.url.clone(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
        })
    }

    /// Get the body as bytes.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        self.body.bytes().await
    }

    /// Get the body as text.
    pub async fn text(self) -> Result<String, NetError> {
        self.body.text().await
    }
}
