//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use http::Method;
use tracing::{info, warn};
use url::Url;

use reliance_common::RelianceConfig;
use reliance_gate::{EdgeGate, GateError, GateRequest, PathKind, SessionResolution, SessionResolver};
use reliance_net::{Fetcher, HttpFetcher, LoaderConfig, Request, RequestMode};
use reliance_sw::{
    CacheStorage, FetchEvent, LocalPlatform, PassthroughReason, Registration, Route, Router,
    ServiceWorker,
};

/// Resolver for offline classification: nobody is signed in.
struct NoSession;

#[async_trait]
impl SessionResolver for NoSession {
    async fn resolve(&self, _request: &GateRequest) -> Result<SessionResolution, GateError> {
        Ok(SessionResolution::default())
    }
}

/// Accept absolute URLs, or paths relative to the worker origin.
fn resolve_url(config: &RelianceConfig, raw: &str) -> anyhow::Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => config
            .worker
            .origin
            .join(raw)
            .with_context(|| format!("invalid path {:?}", raw)),
        Err(e) => Err(e).with_context(|| format!("invalid URL {:?}", raw)),
    }
}

fn build_request(url: Url, method: Method, navigate: bool) -> Request {
    let request = Request::get(url).method(method);
    if navigate {
        request.mode(RequestMode::Navigate)
    } else {
        request
    }
}

pub fn describe_route(route: &Route) -> String {
    match route {
        Route::Passthrough(PassthroughReason::CrossOrigin) => "passthrough (cross-origin)".into(),
        Route::Passthrough(PassthroughReason::AuthExchange) => "passthrough (auth exchange)".into(),
        Route::Passthrough(PassthroughReason::NonGet) => "passthrough (non-GET)".into(),
        Route::Passthrough(PassthroughReason::Inactive) => "passthrough (inactive)".into(),
        Route::Strategy(strategy) => format!("{:?}", strategy),
    }
}

fn describe_kind(kind: PathKind) -> &'static str {
    match kind {
        PathKind::Bypass => "bypass",
        PathKind::Public => "public",
        PathKind::Protected => "protected",
    }
}

/// One output line per URL: route and gate treatment.
pub fn classify_lines(
    config: &RelianceConfig,
    urls: &[String],
    method: &str,
    navigate: bool,
) -> anyhow::Result<Vec<String>> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("invalid method {:?}", method))?;
    let router = Router::new(&config.worker);
    let gate = EdgeGate::new(config.gate.clone(), Arc::new(NoSession));

    urls.iter()
        .map(|raw| {
            let url = resolve_url(config, raw)?;
            let route = router.classify(&build_request(url.clone(), method.clone(), navigate));
            Ok(format!(
                "{}\t{}\tgate={}",
                url,
                describe_route(&route),
                describe_kind(gate.path_kind(url.path()))
            ))
        })
        .collect()
}

pub fn classify(
    config: &RelianceConfig,
    urls: &[String],
    method: &str,
    navigate: bool,
) -> anyhow::Result<()> {
    for line in classify_lines(config, urls, method, navigate)? {
        println!("{}", line);
    }
    Ok(())
}

pub async fn probe(config: &RelianceConfig, urls: &[String], navigate: bool) -> anyhow::Result<()> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(LoaderConfig::from(&config.network))?);
    let (platform, _events) = LocalPlatform::new(true);
    let cache = Arc::new(CacheStorage::new());

    let registration = Registration::new(config.worker.origin.clone(), Arc::clone(&fetcher));
    let worker = ServiceWorker::new(
        config.worker.clone(),
        Arc::clone(&cache),
        Arc::clone(&fetcher),
        Arc::new(platform),
    )?;
    let worker = registration
        .update(worker)
        .await
        .context("worker install failed; is the app reachable?")?;
    info!(worker = %worker.id(), version = worker.version(), "Probe worker active");

    let mut failures = 0;
    for raw in urls {
        let url = resolve_url(config, raw)?;
        for attempt in 1..=2 {
            let request = build_request(url.clone(), Method::GET, navigate);
            match registration.fetch(FetchEvent::new(request)).await {
                Ok(response) => println!(
                    "{}\t#{}\t{}\t{:?}\t{} bytes",
                    url,
                    attempt,
                    response.status.as_u16(),
                    response.source,
                    response.body.len()
                ),
                Err(e) => {
                    warn!(url = %url, error = %e, "Probe fetch failed");
                    println!("{}\t#{}\terror\t{}", url, attempt, e);
                    failures += 1;
                }
            }
        }
    }

    let stats = cache.stats();
    println!(
        "cache: {} lookups, {} hits, {} puts; partitions {:?}",
        stats.lookups,
        stats.hits,
        stats.puts,
        cache.keys().await
    );

    if failures > 0 {
        bail!("{} fetches failed", failures);
    }
    Ok(())
}

pub fn check_config(config: &RelianceConfig) -> anyhow::Result<()> {
    config.validate()?;
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(urls: &[&str], method: &str, navigate: bool) -> Vec<String> {
        let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        classify_lines(&RelianceConfig::default(), &urls, method, navigate).unwrap()
    }

    #[test]
    fn test_classify_relative_paths() {
        let out = lines(&["/_next/static/chunk.js", "/api/reminders"], "GET", false);
        assert_eq!(
            out[0],
            "http://localhost:3000/_next/static/chunk.js\tCacheFirst\tgate=bypass"
        );
        assert_eq!(
            out[1],
            "http://localhost:3000/api/reminders\tNetworkFirst\tgate=protected"
        );
    }

    #[test]
    fn test_classify_navigation_and_auth() {
        let out = lines(
            &["/calendar", "/auth/callback?code=abc123"],
            "get",
            true,
        );
        assert!(out[0].contains("\tNavigation\t"));
        assert!(out[1].contains("passthrough (auth exchange)"));
        assert!(out[1].ends_with("gate=public"));
    }

    #[test]
    fn test_classify_method_and_cross_origin() {
        let out = lines(&["/api/tasks"], "POST", false);
        assert!(out[0].contains("passthrough (non-GET)"));

        let out = lines(&["https://fonts.gstatic.com/font.woff2"], "GET", false);
        assert!(out[0].contains("passthrough (cross-origin)"));
    }

    #[test]
    fn test_classify_rejects_bad_method() {
        let urls = vec!["/".to_string()];
        assert!(classify_lines(&RelianceConfig::default(), &urls, "NOT A METHOD", false).is_err());
    }

    #[test]
    fn test_classify_with_config_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"gate": {{"public_paths": ["/", "/auth/callback", "/about"]}}}}"#
        )
        .unwrap();
        let config = RelianceConfig::load_or_default(Some(file.path())).unwrap();
        check_config(&config).unwrap();

        let urls = vec!["/about/team".to_string(), "/settings".to_string()];
        let out = classify_lines(&config, &urls, "GET", true).unwrap();
        assert!(out[0].ends_with("gate=public"));
        assert!(out[1].ends_with("gate=protected"));
    }

    #[test]
    fn test_check_config_default_is_valid() {
        check_config(&RelianceConfig::default()).unwrap();
    }
}
