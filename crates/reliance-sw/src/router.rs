//! Request classification.
//!
//! Rules, first match wins:
//!
//! 1. cross-origin or auth exchange: bypass
//! 2. non-GET: bypass
//! 3. navigation: [`Strategy::Navigation`]
//! 4. build assets: [`Strategy::CacheFirst`]
//! 5. image endpoint or image file: [`Strategy::StaleWhileRevalidate`]
//! 6. API GET: [`Strategy::NetworkFirst`], or [`Strategy::NetworkOnly`] when
//!    API reads are not cached or the path is auth-sensitive
//! 7. anything else: [`Strategy::NetworkWithFallback`]

use http::Method;
use url::form_urlencoded;

use reliance_common::WorkerConfig;
use reliance_net::{Origin, PathPattern, PatternSet, Request};

use crate::strategy::Strategy;

/// Why a request is left to the network untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Different origin than the worker's scope.
    CrossOrigin,
    /// OAuth callback or a URL carrying one-time auth material.
    AuthExchange,
    /// Mutating method.
    NonGet,
    /// The worker is not the active one.
    Inactive,
}

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Passthrough(PassthroughReason),
    Strategy(Strategy),
}

/// Classifies intercepted requests.
#[derive(Debug, Clone)]
pub struct Router {
    origin: Origin,
    auth_paths: PatternSet,
    auth_params: Vec<String>,
    static_assets: PatternSet,
    images: PatternSet,
    api: PathPattern,
    api_no_store: PatternSet,
    cache_api_reads: bool,
}

impl Router {
    pub fn new(config: &WorkerConfig) -> Self {
        let mut images = PatternSet::new().with(PathPattern::prefix(&config.image_endpoint));
        images.extend(PatternSet::from_strings(
            &config.image_extensions,
            PathPattern::extension,
        ));

        Self {
            origin: Origin::from_url(&config.origin),
            auth_paths: PatternSet::from_strings(&config.auth_prefixes, PathPattern::prefix),
            auth_params: config.auth_params.clone(),
            static_assets: PatternSet::from_strings(&config.static_prefixes, PathPattern::prefix),
            images,
            api: PathPattern::prefix(&config.api_prefix),
            api_no_store: PatternSet::from_strings(
                &config.api_no_store_prefixes,
                PathPattern::prefix,
            ),
            cache_api_reads: config.cache_api_reads,
        }
    }

    /// Classify a request. Never fails; unknown shapes get the default route.
    pub fn classify(&self, request: &Request) -> Route {
        if !self.origin.contains(&request.url) {
            return Route::Passthrough(PassthroughReason::CrossOrigin);
        }
        if self.is_auth_exchange(request) {
            return Route::Passthrough(PassthroughReason::AuthExchange);
        }
        if request.method != Method::GET {
            return Route::Passthrough(PassthroughReason::NonGet);
        }

        let path = request.url.path();
        let strategy = if request.is_navigation() {
            Strategy::Navigation
        } else if self.static_assets.matches(path) {
            Strategy::CacheFirst
        } else if self.images.matches(path) {
            Strategy::StaleWhileRevalidate
        } else if self.api.matches(path) {
            if self.cache_api_reads && !self.api_no_store.matches(path) {
                Strategy::NetworkFirst
            } else {
                Strategy::NetworkOnly
            }
        } else {
            Strategy::NetworkWithFallback
        };
        Route::Strategy(strategy)
    }

    /// Whether the URL is part of an auth exchange and must never be cached.
    pub fn is_auth_exchange(&self, request: &Request) -> bool {
        let url = &request.url;
        if self.auth_paths.matches(url.path()) {
            return true;
        }
        let carries = |pairs: form_urlencoded::Parse<'_>| {
            pairs
                .into_iter()
                .any(|(name, _)| self.auth_params.iter().any(|p| *p == name))
        };
        if url.query().is_some() && carries(url.query_pairs()) {
            return true;
        }
        url.fragment()
            .is_some_and(|fragment| carries(form_urlencoded::parse(fragment.as_bytes())))
    }
}
