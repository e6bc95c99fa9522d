//! Fetch strategies over the runtime and precache partitions.
//!
//! Every strategy except stale-while-revalidate always yields a response:
//! network failures are answered from cache or with a synthetic
//! unavailability response. Stale-while-revalidate with an empty cache has
//! nothing to fall back to and reports the network error.

use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, warn};
use url::Url;

use reliance_common::WorkerConfig;
use reliance_net::{Fetcher, NetError, Request, Response, ResponseSource};

use crate::cache::{CacheEntry, CacheKey, CacheStorage};
use crate::ServiceWorkerError;

/// Body of the API offline indicator.
pub const OFFLINE_JSON: &str = r#"{"offline":true}"#;

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Cache, else network (stored on success).
    CacheFirst,
    /// Cache now, network refresh in the background.
    StaleWhileRevalidate,
    /// Network (stored on success), else cache, else offline JSON.
    NetworkFirst,
    /// Network, else offline JSON. Never touches the cache.
    NetworkOnly,
    /// Preload or network (stored on success), else offline page.
    Navigation,
    /// Network, else cache, else offline text.
    NetworkWithFallback,
}

/// Result of a navigation preload handed over by the host.
pub type Preload = Option<Result<Response, NetError>>;

/// Executes strategies against one worker version's partitions.
pub struct StrategyEngine {
    cache: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    precache: String,
    runtime: String,
    offline_key: CacheKey,
}

impl StrategyEngine {
    pub fn new(
        config: &WorkerConfig,
        cache: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        let offline_url: Url = config.origin.join(&config.offline_page)?;
        Ok(Self {
            cache,
            fetcher,
            precache: config.precache_name(),
            runtime: config.runtime_name(),
            offline_key: CacheKey::get(&offline_url),
        })
    }

    /// Run `strategy` for `request`.
    ///
    /// `preload` is only consulted by [`Strategy::Navigation`].
    pub async fn run(
        &self,
        strategy: Strategy,
        request: &Request,
        preload: Preload,
    ) -> Result<Response, NetError> {
        debug!(url = %request.url, strategy = ?strategy, "Running fetch strategy");
        match strategy {
            Strategy::CacheFirst => Ok(self.cache_first(request).await),
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            Strategy::NetworkFirst => Ok(self.network_first(request).await),
            Strategy::NetworkOnly => Ok(self.network_only(request).await),
            Strategy::Navigation => Ok(self.navigation(request, preload).await),
            Strategy::NetworkWithFallback => Ok(self.network_with_fallback(request).await),
        }
    }

    pub async fn cache_first(&self, request: &Request) -> Response {
        let runtime = self.cache.open(&self.runtime).await;
        let key = CacheKey::from_request(request);
        if let Some(entry) = runtime.match_request(&key).await {
            return entry.to_response();
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    runtime.put(key, CacheEntry::from_response(&response)).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Cache-first miss while offline");
                Response::synthetic(StatusCode::GATEWAY_TIMEOUT, "text/plain", "")
            }
        }
    }

    pub async fn stale_while_revalidate(&self, request: &Request) -> Result<Response, NetError> {
        let runtime = self.cache.open(&self.runtime).await;
        let key = CacheKey::from_request(request);

        if let Some(entry) = runtime.match_request(&key).await {
            // Detached: its outcome only shows up in later reads.
            let fetcher = Arc::clone(&self.fetcher);
            let request = request.clone();
            tokio::spawn(async move {
                match fetcher.fetch(&request).await {
                    Ok(response) if response.ok() => {
                        runtime.put(key, CacheEntry::from_response(&response)).await;
                    }
                    Ok(response) => {
                        debug!(url = %request.url, status = %response.status, "Revalidation not stored");
                    }
                    Err(e) => {
                        debug!(url = %request.url, error = %e, "Background revalidation failed");
                    }
                }
            });
            return Ok(entry.to_response());
        }

        let response = self.fetcher.fetch(request).await?;
        if response.ok() {
            runtime.put(key, CacheEntry::from_response(&response)).await;
        }
        Ok(response)
    }

    pub async fn network_first(&self, request: &Request) -> Response {
        let runtime = self.cache.open(&self.runtime).await;
        let key = CacheKey::from_request(request);

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    runtime.put(key, CacheEntry::from_response(&response)).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network-first falling back to cache");
                match runtime.match_request(&key).await {
                    Some(entry) => entry.to_response(),
                    None => offline_json(),
                }
            }
        }
    }

    pub async fn network_only(&self, request: &Request) -> Response {
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Uncached API read failed");
                offline_json()
            }
        }
    }

    pub async fn navigation(&self, request: &Request, preload: Preload) -> Response {
        // Handles are taken before any await on the network so a version
        // swap mid-flight deletes them instead of being undone by a late open.
        let runtime = self.cache.open(&self.runtime).await;
        let precache = self.cache.open(&self.precache).await;

        let attempt = match preload {
            Some(Ok(response)) => return response.with_source(ResponseSource::Preload),
            Some(Err(e)) => Err(e),
            None => self.fetcher.fetch(request).await,
        };

        match attempt {
            Ok(response) => {
                if response.ok() {
                    runtime
                        .put(CacheKey::from_request(request), CacheEntry::from_response(&response))
                        .await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation failed; serving offline page");
                match precache.match_request(&self.offline_key).await {
                    Some(entry) => entry.to_response(),
                    None => {
                        warn!(key = %self.offline_key, "Offline page missing from precache");
                        offline_text()
                    }
                }
            }
        }
    }

    pub async fn network_with_fallback(&self, request: &Request) -> Response {
        let runtime = self.cache.open(&self.runtime).await;
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed; trying runtime cache");
                match runtime.match_request(&CacheKey::from_request(request)).await {
                    Some(entry) => entry.to_response(),
                    None => offline_text(),
                }
            }
        }
    }
}

fn offline_json() -> Response {
    Response::synthetic(StatusCode::SERVICE_UNAVAILABLE, "application/json", OFFLINE_JSON)
}

fn offline_text() -> Response {
    Response::synthetic(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "Offline")
}
