//! # Reliance Net
//!
//! Request and response types, the origin model, path patterns, and the
//! network fetcher used by the offline worker and the edge gate.
//!
//! ## Design Goals
//!
//! 1. **Injectable network**: everything above this crate talks to the
//!    network through the [`Fetcher`] trait, so strategies and routing can be
//!    tested without sockets.
//! 2. **Snapshot responses**: bodies are fully buffered [`Bytes`], cheap to
//!    clone into a cache and back out again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

use reliance_common::NetworkConfig;

#[cfg(feature = "mock")]
pub mod mock;
pub mod origin;
pub mod pattern;

pub use origin::Origin;
pub use pattern::{PathPattern, PatternSet, PatternType};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unavailable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
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

/// How the request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Full-page load.
    Navigate,
    /// Same-origin subresource.
    #[default]
    SameOrigin,
    /// Cross-origin subresource with CORS.
    Cors,
    /// Opaque cross-origin subresource.
    NoCors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::SameOrigin,
            timeout: None,
        }
    }

    /// Create a navigation (full-page) GET request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Replace the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Replace the mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this is a full-page load.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fetched from the network for this request.
    Network,
    /// Handed over by the host's navigation preload.
    Preload,
    /// Read from a cache partition.
    Cache,
    /// Built locally to signal unavailability.
    Synthetic,
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    /// Create a network response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    /// Create a locally built response.
    pub fn synthetic(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut response = Self::new(status, body);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response.source = ResponseSource::Synthetic;
        response
    }

    /// Set a header, builder style.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the source, builder style.
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get content-type from headers.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network as seen by the worker.
///
/// Implementations must not consult any cache of their own; a failed fetch
/// is reported as `Err` and never as a synthetic response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for LoaderConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            default_timeout: Duration::from_secs(config.timeout_secs),
            max_redirects: config.max_redirects,
        }
    }
}

/// [`Fetcher`] backed by reqwest.
pub struct HttpFetcher {
    client: Client,
    default_timeout: Duration,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self {
            client,
            default_timeout: config.default_timeout,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(body) = request.body.clone() {
            req_builder = req_builder.body(body);
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(request.timeout.unwrap_or(self.default_timeout))
            } else if e.is_connect() {
                NetError::Offline(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
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
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigation_request() {
        let request = Request::navigate(Url::parse("https://example.com/calendar").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(matches!(Request::parse("not a url"), Err(NetError::InvalidUrl(_))));
    }

    #[test]
    fn test_synthetic_response() {
        let response = Response::synthetic(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "Offline");
        assert!(!response.ok());
        assert_eq!(response.source, ResponseSource::Synthetic);
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.text().unwrap(), "Offline");
    }

    #[test]
    fn test_loader_config_from_network_section() {
        let section = NetworkConfig {
            user_agent: "Test/1.0".to_string(),
            timeout_secs: 5,
            max_redirects: 2,
        };
        let config = LoaderConfig::from(&section);
        assert_eq!(config.user_agent, "Test/1.0");
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.max_redirects, 2);
    }

    #[tokio::test]
    async fn test_http_fetcher_returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_next/static/chunk.js"))
            .and(header("x-probe", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/javascript")
                    .set_body_string("console.log(1)"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse(&format!("{}/_next/static/chunk.js", server.uri()))
            .unwrap()
            .header(HeaderName::from_static("x-probe"), HeaderValue::from_static("1"));
        let response = fetcher.fetch(&request).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.content_type(), Some("application/javascript"));
        assert_eq!(response.text().unwrap(), "console.log(1)");
    }

    #[tokio::test]
    async fn test_http_fetcher_passes_error_status_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let request = Request::parse(&format!("{}/api/tasks", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_http_fetcher_reports_client_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig {
            default_timeout: Duration::from_millis(100),
            ..LoaderConfig::default()
        })
        .unwrap();
        let request = Request::parse(&format!("{}/api/slow", server.uri())).unwrap();

        match fetcher.fetch(&request).await {
            Err(NetError::Timeout(after)) => assert_eq!(after, Duration::from_millis(100)),
            other => panic!("expected timeout, got {:?}", other.map(|r| r.status)),
        }
    }

    #[tokio::test]
    async fn test_http_fetcher_connection_refused_is_error() {
        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let request = Request::parse("http://127.0.0.1:9/offline").unwrap();
        assert!(fetcher.fetch(&request).await.is_err());
    }
}
