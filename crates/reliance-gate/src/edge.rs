//! Per-navigation session gate.
//!
//! | path kind | session | decision                  |
//! |-----------|---------|---------------------------|
//! | protected | none    | redirect to public entry  |
//! | public    | valid   | redirect to landing page  |
//! | otherwise |         | continue                  |
//!
//! Bypassed paths are decided before the session is looked up.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderMap, LOCATION, SET_COOKIE};
use http::{Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use reliance_common::{GateConfig, UnlistedPolicy};
use reliance_net::{PathPattern, PatternSet};

use crate::cookie::{request_cookies, SetCookie};
use crate::user::is_authenticated;
use crate::GateError;

/// How the gate treats a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Assets and offline documents; never gated.
    Bypass,
    Public,
    Protected,
}

/// An incoming navigation as seen by the gate.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

impl GateRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Value of the named request cookie.
    pub fn cookie(&self, name: &str) -> Option<String> {
        request_cookies(&self.headers)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// What the session collaborator reported.
#[derive(Debug, Clone, Default)]
pub struct SessionResolution {
    /// Raw user object, if any.
    pub user: Option<Value>,
    /// Refreshed session cookies to send back.
    pub cookies: Vec<SetCookie>,
}

/// The auth provider's "get current session".
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, request: &GateRequest) -> Result<SessionResolution, GateError>;
}

/// Gate decision for one navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Continue,
    Redirect(Url),
}

/// Decision plus cookies that must reach the client whichever response is
/// produced.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub decision: GateDecision,
    pub cookies_to_set: Vec<SetCookie>,
}

impl GateOutcome {
    /// Produce the response: a 307 redirect, or whatever `next` returns.
    ///
    /// Session cookies are attached exactly once in both cases.
    pub fn into_response<B, F>(self, next: F) -> Result<Response<B>, GateError>
    where
        B: Default,
        F: FnOnce() -> Response<B>,
    {
        let mut response = match self.decision {
            GateDecision::Redirect(location) => Response::builder()
                .status(StatusCode::TEMPORARY_REDIRECT)
                .header(LOCATION, location.as_str())
                .body(B::default())?,
            GateDecision::Continue => next(),
        };

        let headers = response.headers_mut();
        for cookie in &self.cookies_to_set {
            headers.append(SET_COOKIE, cookie.to_header_value()?);
        }
        Ok(response)
    }
}

/// The edge authentication gate.
pub struct EdgeGate {
    config: GateConfig,
    bypass: PatternSet,
    resolver: Arc<dyn SessionResolver>,
}

impl EdgeGate {
    pub fn new(config: GateConfig, resolver: Arc<dyn SessionResolver>) -> Self {
        let mut bypass = PatternSet::from_strings(&config.bypass_prefixes, PathPattern::prefix);
        bypass.extend(PatternSet::from_strings(
            &config.bypass_extensions,
            PathPattern::extension,
        ));
        bypass.extend(PatternSet::from_strings(
            &config.offline_paths,
            PathPattern::exact,
        ));
        Self {
            config,
            bypass,
            resolver,
        }
    }

    /// Classify a path.
    pub fn path_kind(&self, path: &str) -> PathKind {
        if self.bypass.matches(path) {
            PathKind::Bypass
        } else if self.config.is_public(path) {
            PathKind::Public
        } else if self.config.is_protected(path) {
            PathKind::Protected
        } else {
            match self.config.unlisted {
                UnlistedPolicy::Public => PathKind::Public,
                UnlistedPolicy::Protected => PathKind::Protected,
            }
        }
    }

    /// Evaluate one navigation. Resolves the session at most once.
    pub async fn evaluate(&self, request: &GateRequest) -> GateOutcome {
        let kind = self.path_kind(request.url.path());
        if kind == PathKind::Bypass {
            return GateOutcome {
                decision: GateDecision::Continue,
                cookies_to_set: Vec::new(),
            };
        }

        let (authenticated, cookies_to_set) = match self.resolver.resolve(request).await {
            Ok(resolution) => (is_authenticated(resolution.user.as_ref()), resolution.cookies),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Session lookup failed; treating as signed out");
                (false, Vec::new())
            }
        };

        let decision = self.decide(kind, authenticated, &request.url);
        debug!(
            path = request.url.path(),
            kind = ?kind,
            authenticated,
            decision = ?decision,
            "Gate decision"
        );
        GateOutcome {
            decision,
            cookies_to_set,
        }
    }

    /// The decision table. Redirects keep the query string.
    pub fn decide(&self, kind: PathKind, authenticated: bool, url: &Url) -> GateDecision {
        let target = match (kind, authenticated) {
            (PathKind::Protected, false) => &self.config.public_entry,
            (PathKind::Public, true) => {
                info!(path = url.path(), "Signed-in visitor on public page");
                &self.config.landing_path
            }
            _ => return GateDecision::Continue,
        };
        let mut location = url.clone();
        location.set_path(target);
        location.set_fragment(None);
        GateDecision::Redirect(location)
    }
}
