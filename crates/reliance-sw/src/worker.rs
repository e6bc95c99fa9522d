//! A single worker version: install, activate, and fetch handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use reliance_common::WorkerConfig;
use reliance_net::{Fetcher, NetError, Request, Response};

use crate::cache::{CacheEntry, CacheKey, CacheStorage};
use crate::lifecycle::{ClientMessage, ControlMessage, Platform, WorkerId, WorkerState};
use crate::router::{PassthroughReason, Route, Router};
use crate::strategy::{Preload, StrategyEngine};
use crate::ServiceWorkerError;

/// An intercepted request.
#[derive(Debug)]
pub struct FetchEvent {
    pub request: Request,

    /// Navigation preload result, when the host started one.
    pub preload: Preload,

    /// Client that issued the request.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            preload: None,
            client_id: None,
        }
    }

    pub fn with_preload(mut self, preload: Result<Response, NetError>) -> Self {
        self.preload = Some(preload);
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// What the worker did with a fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; the host sends the request to the network unmodified.
    Passthrough(PassthroughReason),
    /// Answered by a strategy.
    Respond(Response),
    /// Nothing to answer with.
    Failed(NetError),
}

/// One version of the offline worker.
pub struct ServiceWorker {
    id: WorkerId,
    config: WorkerConfig,
    cache: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    platform: Arc<dyn Platform>,
    router: Router,
    engine: StrategyEngine,
    state: watch::Sender<WorkerState>,
    skip_waiting: AtomicBool,
    skip_waiting_on_install: bool,
}

impl ServiceWorker {
    pub fn new(
        config: WorkerConfig,
        cache: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        platform: Arc<dyn Platform>,
    ) -> Result<Self, ServiceWorkerError> {
        let engine = StrategyEngine::new(&config, Arc::clone(&cache), Arc::clone(&fetcher))?;
        let (state, _) = watch::channel(WorkerState::Parsed);
        Ok(Self {
            id: WorkerId::new(),
            router: Router::new(&config),
            config,
            cache,
            fetcher,
            platform,
            engine,
            state,
            skip_waiting: AtomicBool::new(false),
            skip_waiting_on_install: true,
        })
    }

    /// Stay waiting after install until told to skip waiting.
    pub fn wait_for_adoption(mut self) -> Self {
        self.skip_waiting_on_install = false;
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        debug!(worker = %self.id, from = ?previous, to = ?state, "Worker state change");
    }

    fn expect_state(&self, expected: WorkerState, op: &str) -> Result<(), ServiceWorkerError> {
        let current = self.state();
        if current != expected {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot {} a worker in state {:?}",
                op, current
            )));
        }
        Ok(())
    }

    /// Populate the precache partition.
    ///
    /// All-or-nothing: a failed or non-2xx response for any URL stores
    /// nothing and leaves the worker redundant.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.expect_state(WorkerState::Parsed, "install")?;
        self.set_state(WorkerState::Installing);

        // Opened first: an activation racing this install evicts the handle.
        let precache = self.cache.open(&self.config.precache_name()).await;
        match self.fetch_precache().await {
            Ok(_) if self.state() == WorkerState::Redundant => {
                debug!(worker = %self.id, "Worker made redundant while installing");
                if precache.is_empty().await {
                    self.cache.delete(precache.name()).await;
                }
                return Err(ServiceWorkerError::StateError(
                    "worker became redundant during install".to_string(),
                ));
            }
            Ok(entries) => {
                for (key, entry) in entries {
                    precache.put(key, entry).await;
                }
            }
            Err(e) => {
                warn!(worker = %self.id, version = %self.config.version, error = %e, "Install failed");
                if precache.is_empty().await {
                    self.cache.delete(precache.name()).await;
                }
                self.set_state(WorkerState::Redundant);
                return Err(e);
            }
        }

        self.set_state(WorkerState::Installed);
        if self.skip_waiting_on_install {
            self.skip_waiting.store(true, Ordering::Release);
        }
        info!(
            worker = %self.id,
            version = %self.config.version,
            urls = self.config.precache_urls.len(),
            "Worker installed"
        );
        Ok(())
    }

    async fn fetch_precache(&self) -> Result<Vec<(CacheKey, CacheEntry)>, ServiceWorkerError> {
        let requests = self
            .config
            .precache_urls
            .iter()
            .map(|path| self.config.origin.join(path).map(Request::get))
            .collect::<Result<Vec<_>, _>>()?;

        try_join_all(requests.into_iter().map(|request| async move {
            let install_failed = |reason: String| ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason,
            };
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| install_failed(e.to_string()))?;
            if !response.ok() {
                return Err(install_failed(format!("status {}", response.status)));
            }
            Ok((
                CacheKey::from_request(&request),
                CacheEntry::from_response(&response),
            ))
        }))
        .await
    }

    /// Take over from the previous version.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        self.expect_state(WorkerState::Installed, "activate")?;
        self.set_state(WorkerState::Activating);

        if let Err(e) = self.platform.enable_navigation_preload().await {
            debug!(worker = %self.id, error = %e, "Navigation preload unavailable");
        }

        let removed = self.cache.delete_except(&self.config.partition_names()).await;
        if !removed.is_empty() {
            info!(worker = %self.id, removed = ?removed, "Removed stale partitions");
        }

        if let Err(e) = self.platform.claim_clients(self.id).await {
            warn!(worker = %self.id, error = %e, "Failed to claim clients");
        }

        let ready = ClientMessage::SwReady {
            version: self.config.version.clone(),
        };
        match self.platform.post_to_clients(&ready, true).await {
            Ok(delivered) => debug!(worker = %self.id, delivered, "Announced readiness"),
            Err(e) => warn!(worker = %self.id, error = %e, "Failed to announce readiness"),
        }

        self.set_state(WorkerState::Activated);
        info!(worker = %self.id, version = %self.config.version, "Worker activated");
        Ok(())
    }

    /// Handle a message posted by a page.
    pub fn handle_message(&self, message: &ControlMessage) {
        match message {
            ControlMessage::SkipWaiting => {
                debug!(worker = %self.id, "Skip waiting requested");
                self.skip_waiting.store(true, Ordering::Release);
            }
        }
    }

    pub fn mark_redundant(&self) {
        if self.state() != WorkerState::Redundant {
            self.set_state(WorkerState::Redundant);
        }
    }

    /// Route and answer one intercepted request.
    pub async fn handle_fetch(&self, event: FetchEvent) -> FetchOutcome {
        if !self.is_active() {
            return FetchOutcome::Passthrough(PassthroughReason::Inactive);
        }

        let strategy = match self.router.classify(&event.request) {
            Route::Passthrough(reason) => {
                debug!(url = %event.request.url, reason = ?reason, "Passing request through");
                return FetchOutcome::Passthrough(reason);
            }
            Route::Strategy(strategy) => strategy,
        };

        match self.engine.run(strategy, &event.request, event.preload).await {
            Ok(response) => FetchOutcome::Respond(response),
            Err(e) => FetchOutcome::Failed(e),
        }
    }

    /// Like [`handle_fetch`](Self::handle_fetch), with pass-throughs sent to
    /// the network.
    pub async fn fetch(&self, event: FetchEvent) -> Result<Response, NetError> {
        let request = event.request.clone();
        match self.handle_fetch(event).await {
            FetchOutcome::Passthrough(_) => self.fetcher.fetch(&request).await,
            FetchOutcome::Respond(response) => Ok(response),
            FetchOutcome::Failed(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{LocalPlatform, PlatformEvent};
    use http::StatusCode;
    use reliance_net::mock::ScriptedFetcher;
    use reliance_net::{RequestMode, ResponseSource};
    use tokio::sync::mpsc;
    use url::Url;

    const ORIGIN: &str = "http://localhost:3000";

    struct Harness {
        cache: Arc<CacheStorage>,
        net: Arc<ScriptedFetcher>,
        platform: Arc<LocalPlatform>,
        events: mpsc::UnboundedReceiver<PlatformEvent>,
    }

    fn harness() -> Harness {
        let (platform, events) = LocalPlatform::new(true);
        let net = Arc::new(ScriptedFetcher::new());
        net.respond(&url("/offline.html"), StatusCode::OK, "<h1>You are offline</h1>");
        Harness {
            cache: Arc::new(CacheStorage::new()),
            net,
            platform: Arc::new(platform),
            events,
        }
    }

    fn url(path: &str) -> String {
        format!("{}{}", ORIGIN, path)
    }

    fn config(version: &str) -> WorkerConfig {
        WorkerConfig {
            version: version.to_string(),
            ..WorkerConfig::default()
        }
    }

    fn worker(h: &Harness, version: &str) -> ServiceWorker {
        ServiceWorker::new(
            config(version),
            Arc::clone(&h.cache),
            h.net.clone(),
            h.platform.clone(),
        )
        .unwrap()
    }

    async fn active_worker(h: &Harness, version: &str) -> ServiceWorker {
        let worker = worker(h, version);
        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        worker
    }

    fn event(path: &str) -> FetchEvent {
        FetchEvent::new(Request::parse(&url(path)).unwrap())
    }

    #[tokio::test]
    async fn test_install_precaches_and_requests_skip_waiting() {
        let h = harness();
        let worker = worker(&h, "v4");
        let mut states = worker.subscribe();

        worker.install().await.unwrap();

        assert_eq!(worker.state(), WorkerState::Installed);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), WorkerState::Installed);
        assert!(worker.skip_waiting_requested());
        assert_eq!(h.cache.open("precache-v4").await.len().await, 1);
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let h = harness();
        let config = WorkerConfig {
            precache_urls: vec!["/offline.html".to_string(), "/missing.css".to_string()],
            ..WorkerConfig::default()
        };
        h.net.respond(&url("/missing.css"), StatusCode::NOT_FOUND, "");
        let worker =
            ServiceWorker::new(config, Arc::clone(&h.cache), h.net.clone(), h.platform.clone())
                .unwrap();

        let result = worker.install().await;

        assert!(matches!(
            result,
            Err(ServiceWorkerError::InstallFailed { ref url, .. }) if url.ends_with("/missing.css")
        ));
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(!h.cache.has("precache-v4").await);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let h = harness();
        let worker = worker(&h, "v4");
        assert!(matches!(
            worker.activate().await,
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_activate_claims_and_announces() {
        let mut h = harness();
        let client = h.platform.open_client(Url::parse(&url("/calendar")).unwrap()).await;

        let worker = active_worker(&h, "v4").await;

        assert!(worker.is_active());
        assert!(h.platform.navigation_preload_enabled());
        assert_eq!(
            h.platform.client(&client).await.unwrap().controller,
            Some(worker.id())
        );

        let mut saw_ready = false;
        while let Ok(event) = h.events.try_recv() {
            if let PlatformEvent::Message { message, .. } = event {
                assert_eq!(
                    message,
                    ClientMessage::SwReady {
                        version: "v4".to_string()
                    }
                );
                saw_ready = true;
            }
        }
        assert!(saw_ready);
    }

    #[tokio::test]
    async fn test_activate_without_preload_support() {
        let (platform, _events) = LocalPlatform::new(false);
        let net = Arc::new(ScriptedFetcher::new());
        net.respond(&url("/offline.html"), StatusCode::OK, "offline");
        let worker = ServiceWorker::new(
            WorkerConfig::default(),
            Arc::new(CacheStorage::new()),
            net,
            Arc::new(platform),
        )
        .unwrap();

        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        assert!(worker.is_active());
    }

    #[tokio::test]
    async fn test_version_rollover_makes_old_entries_unreachable() {
        let h = harness();
        let v3 = active_worker(&h, "v3").await;
        h.net.respond(&url("/_next/static/old.js"), StatusCode::OK, "old");
        v3.fetch(event("/_next/static/old.js")).await.unwrap();
        let old_runtime = h.cache.open("runtime-v3").await;
        let old_key = CacheKey::get(&Url::parse(&url("/_next/static/old.js")).unwrap());
        assert!(old_runtime.match_request(&old_key).await.is_some());

        let _v4 = active_worker(&h, "v4").await;

        assert!(!h.cache.has("precache-v3").await);
        assert!(!h.cache.has("runtime-v3").await);
        assert!(h.cache.has("precache-v4").await);
        assert!(old_runtime.match_request(&old_key).await.is_none());
        let reopened = h.cache.open("runtime-v3").await;
        assert!(reopened.is_empty().await);
        assert!(reopened.match_request(&old_key).await.is_none());
    }

    #[tokio::test]
    async fn test_static_chunk_cached_after_first_fetch() {
        let h = harness();
        let worker = active_worker(&h, "v4").await;
        h.net.respond(&url("/_next/static/chunk.js"), StatusCode::OK, "console.log(1)");

        let first = worker.fetch(event("/_next/static/chunk.js")).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);

        let second = worker.fetch(event("/_next/static/chunk.js")).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.text().unwrap(), "console.log(1)");
        assert_eq!(h.net.calls(&url("/_next/static/chunk.js")), 1);
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_precached_page() {
        let h = harness();
        let worker = active_worker(&h, "v4").await;
        h.net.set_offline(true);

        let request = Request::parse(&url("/calendar"))
            .unwrap()
            .mode(RequestMode::Navigate);
        let response = worker.fetch(FetchEvent::new(request)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.text().unwrap(), "<h1>You are offline</h1>");
    }

    #[tokio::test]
    async fn test_auth_callback_never_touches_cache() {
        let h = harness();
        let worker = active_worker(&h, "v4").await;
        let callback = url("/auth/callback?code=abc123");
        h.net.respond(&callback, StatusCode::OK, "exchanged");
        let lookups_before = h.cache.stats().lookups;
        let puts_before = h.cache.stats().puts;

        let outcome = worker.handle_fetch(event("/auth/callback?code=abc123")).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Passthrough(PassthroughReason::AuthExchange)
        ));

        let response = worker.fetch(event("/auth/callback?code=abc123")).await.unwrap();
        assert_eq!(response.text().unwrap(), "exchanged");
        assert_eq!(h.net.calls(&callback), 1);
        assert_eq!(h.cache.stats().lookups, lookups_before);
        assert_eq!(h.cache.stats().puts, puts_before);
        assert!(h.cache.open("runtime-v4").await.is_empty().await);
    }

    #[tokio::test]
    async fn test_inactive_worker_passes_through() {
        let h = harness();
        let worker = worker(&h, "v4");
        let outcome = worker.handle_fetch(event("/_next/static/chunk.js")).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Passthrough(PassthroughReason::Inactive)
        ));
    }

    #[tokio::test]
    async fn test_swr_empty_cache_offline_is_failed_outcome() {
        let h = harness();
        let worker = active_worker(&h, "v4").await;
        h.net.set_offline(true);

        let outcome = worker.handle_fetch(event("/icons/icon-192.png")).await;
        assert!(matches!(outcome, FetchOutcome::Failed(NetError::Offline(_))));
    }

    #[tokio::test]
    async fn test_skip_waiting_message() {
        let h = harness();
        let worker = worker(&h, "v4").wait_for_adoption();
        worker.install().await.unwrap();
        assert!(!worker.skip_waiting_requested());

        let message = ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        worker.handle_message(&message);
        assert!(worker.skip_waiting_requested());
    }
}
