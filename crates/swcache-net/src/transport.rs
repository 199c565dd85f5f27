//! Network transport.

use std::time::Duration;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, CACHE_CONTROL, COOKIE, PRAGMA, REFERER};
use http::HeaderValue;
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{Body, CacheMode, CredentialsMode, NetError, RedirectMode, Request, Response, CLIENT_REFERRER};

/// Performs real network fetches.
///
/// A rejected fetch (`Err`) means the network was unreachable; HTTP error
/// statuses are successful fetches with a non-2xx [`Response`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum redirects followed for `follow` requests.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("swcache/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// reqwest-backed transport.
///
/// reqwest fixes the redirect policy per client, so `follow` requests and
/// `manual`/`error` requests go through separate clients.
pub struct HttpTransport {
    following: Client,
    stopping: Client,
}

impl HttpTransport {
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let following = build_client(&config, Policy::limited(config.max_redirects))?;
        let stopping = build_client(&config, Policy::none())?;

        info!(user_agent = %config.user_agent, max_redirects = config.max_redirects, "HttpTransport initialized");

        Ok(Self { following, stopping })
    }

    fn client_for(&self, redirect: RedirectMode) -> &Client {
        match redirect {
            RedirectMode::Follow => &self.following,
            RedirectMode::Manual | RedirectMode::Error => &self.stopping,
        }
    }
}

fn build_client(config: &LoaderConfig, policy: Policy) -> Result<Client, NetError> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout)
        .redirect(policy)
        .build()
        .map_err(|e| NetError::RequestFailed(e.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(
            url = %request.url,
            method = %request.method,
            redirect = %request.redirect,
            credentials = %request.credentials,
            "Fetching resource"
        );

        let mut headers = request.headers.clone();
        if request.credentials == CredentialsMode::Omit {
            headers.remove(COOKIE);
            headers.remove(AUTHORIZATION);
        }

        let mut builder = self
            .client_for(request.redirect)
            .request(request.method.clone(), request.url.clone())
            .headers(headers);

        if !request.referrer.is_empty()
            && request.referrer != CLIENT_REFERRER
            && !request.headers.contains_key(REFERER)
        {
            builder = builder.header(REFERER, request.referrer.as_str());
        }

        // Bypassing caches is requested through headers, as browsers do.
        if matches!(request.cache, CacheMode::NoStore | CacheMode::Reload)
            && !request.headers.contains_key(CACHE_CONTROL)
        {
            builder = builder
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        if request.allows_body() && !request.body.is_empty() {
            builder = builder.body(request.body.bytes().await?);
        }

        let response = builder.send().await?;

        let status = response.status();
        if request.redirect == RedirectMode::Error && status.is_redirection() {
            return Err(NetError::RequestFailed(format!(
                "{} redirected with {} but redirects are not allowed",
                request.url, status
            )));
        }

        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(url),
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: Body::from(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use url::Url;
    use wiremock::matchers::{body_string, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("swcache/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_get() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/javascript")
                    .set_body_string("console.log(1)"),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/app.js", server.uri())).unwrap();
        let response = transport.fetch(Request::get(url)).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.header_str("content-type"), Some("text/javascript"));
        assert_eq!(response.text().await.unwrap(), "console.log(1)");
    }

    #[tokio::test]
    async fn test_fetch_post_sends_body_and_referrer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(body_string("{\"n\":1}"))
            .and(header("referer", "https://ex.com/page"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/api/items", server.uri())).unwrap();
        let request = Request::post(url, "{\"n\":1}").referrer("https://ex.com/page");
        let response = transport.fetch(request).await.unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/down", server.uri())).unwrap();
        let response = transport.fetch(Request::get(url)).await.unwrap();

        assert!(!response.ok());
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    async fn redirecting_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("{}/new", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_redirect_modes() {
        let server = redirecting_server().await;
        let transport = HttpTransport::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();

        let followed = transport.fetch(Request::get(url.clone())).await.unwrap();
        assert_eq!(followed.status, StatusCode::OK);
        assert_eq!(followed.url.as_ref().map(|u| u.path()), Some("/new"));
        assert_eq!(followed.text().await.unwrap(), "moved");

        let manual = transport
            .fetch(Request::get(url.clone()).redirect(RedirectMode::Manual))
            .await
            .unwrap();
        assert_eq!(manual.status, StatusCode::FOUND);
        assert!(manual.header_str("location").unwrap().ends_with("/new"));

        let refused = transport
            .fetch(Request::get(url).redirect(RedirectMode::Error))
            .await;
        assert!(matches!(refused, Err(NetError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_omit_credentials_strips_cookie_and_authorization() {
        let server = MockServer::start().await;
        Mock::given(header_exists("cookie"))
            .respond_with(ResponseTemplate::new(400))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(401))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/private", server.uri())).unwrap();
        let with_credentials = || {
            Request::get(url.clone())
                .header(COOKIE, HeaderValue::from_static("session=1"))
                .header(AUTHORIZATION, HeaderValue::from_static("Bearer t"))
        };

        let omitted = transport
            .fetch(with_credentials().credentials(CredentialsMode::Omit))
            .await
            .unwrap();
        assert_eq!(omitted.status, StatusCode::OK);

        let included = transport
            .fetch(with_credentials().credentials(CredentialsMode::Include))
            .await
            .unwrap();
        assert!(!included.ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_rejects() {
        let transport = HttpTransport::new(LoaderConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();

        assert!(transport.fetch(Request::get(url)).await.is_err());
    }
}
