//! Reliance configuration
//!
//! All sections deserialize from a single JSON document and every field
//! has a default, so an empty `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::logging::LogFormat;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelianceConfig {
    /// Offline worker settings
    pub worker: WorkerConfig,

    /// Edge authentication gate settings
    pub gate: GateConfig,

    /// Client install detection and prompt settings
    pub install: InstallConfig,

    /// HTTP client settings
    pub network: NetworkConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deployment generation; names both cache partitions
    pub version: String,

    /// Origin the worker is scoped to
    pub origin: Url,

    /// Paths fetched into the precache partition at install
    pub precache_urls: Vec<String>,

    /// Offline fallback document served to failed navigations
    pub offline_page: String,

    /// Build asset prefixes served cache-first
    pub static_prefixes: Vec<String>,

    /// Image optimization endpoint
    pub image_endpoint: String,

    /// File extensions treated as images (without the dot)
    pub image_extensions: Vec<String>,

    /// Prefix of API routes
    pub api_prefix: String,

    /// API prefixes that must never be cached
    pub api_no_store_prefixes: Vec<String>,

    /// Path prefixes reserved for auth exchanges
    pub auth_prefixes: Vec<String>,

    /// Query or fragment parameters carrying one-time auth material
    pub auth_params: Vec<String>,

    /// Cache API GET responses (network-first) instead of passing them through
    pub cache_api_reads: bool,
}

impl WorkerConfig {
    /// Name of the precache partition for this version.
    pub fn precache_name(&self) -> String {
        format!("precache-{}", self.version)
    }

    /// Name of the runtime partition for this version.
    pub fn runtime_name(&self) -> String {
        format!("runtime-{}", self.version)
    }

    /// The partitions allowed to survive activation.
    pub fn partition_names(&self) -> Vec<String> {
        vec![self.precache_name(), self.runtime_name()]
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v4".to_string(),
            origin: Url::parse("http://localhost:3000").expect("static origin parses"),
            precache_urls: vec!["/offline.html".to_string()],
            offline_page: "/offline.html".to_string(),
            static_prefixes: vec!["/_next/static/".to_string()],
            image_endpoint: "/_next/image".to_string(),
            image_extensions: ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            api_prefix: "/api/".to_string(),
            api_no_store_prefixes: vec!["/api/auth".to_string()],
            auth_prefixes: vec!["/auth/".to_string()],
            auth_params: vec![
                "code".to_string(),
                "access_token".to_string(),
                "refresh_token".to_string(),
            ],
            cache_api_reads: true,
        }
    }
}

/// Kind assigned to paths that match neither the public nor the protected list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlistedPolicy {
    Public,
    #[default]
    Protected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Paths reachable without a session; nested paths included
    pub public_paths: Vec<String>,

    /// Prefixes that require a session
    pub protected_prefixes: Vec<String>,

    /// Treatment of paths in neither list
    pub unlisted: UnlistedPolicy,

    /// Where unauthenticated visitors of protected paths are sent
    pub public_entry: String,

    /// Where authenticated visitors of public paths are sent
    pub landing_path: String,

    /// Prefixes skipped before session resolution
    pub bypass_prefixes: Vec<String>,

    /// Extensions skipped before session resolution
    pub bypass_extensions: Vec<String>,

    /// Offline-support documents skipped before session resolution
    pub offline_paths: Vec<String>,
}

impl GateConfig {
    /// Whether `path` equals a public path or is nested under one.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths
            .iter()
            .any(|public| path_is_within(path, public))
    }

    /// Whether `path` is under an explicitly protected prefix.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| path_is_within(path, prefix))
    }
}

/// `base` itself or a sub-path of it, never a sibling sharing a prefix.
///
/// `/task` contains `/task/new` but not `/tasks`; `/` only contains itself.
pub fn path_is_within(path: &str, base: &str) -> bool {
    let base = if base.len() > 1 {
        base.trim_end_matches('/')
    } else {
        base
    };
    path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/') && base != "/")
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            public_paths: vec!["/".to_string(), "/auth/callback".to_string()],
            protected_prefixes: vec![
                "/calendar".to_string(),
                "/task".to_string(),
                "/reminders".to_string(),
            ],
            unlisted: UnlistedPolicy::Protected,
            public_entry: "/".to_string(),
            landing_path: "/calendar".to_string(),
            bypass_prefixes: vec![
                "/_next/static".to_string(),
                "/_next/image".to_string(),
                "/favicon.ico".to_string(),
            ],
            bypass_extensions: ["svg", "png", "jpg", "jpeg", "gif", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            offline_paths: vec![
                "/offline.html".to_string(),
                "/sw.js".to_string(),
                "/manifest.webmanifest".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Send visitors of a non-installed app to the install page
    pub redirect_to_install: bool,

    /// Install instructions page
    pub install_path: String,

    /// How long a dismissed install banner stays hidden
    pub dismiss_ttl_hours: u64,

    /// Banner delay once a deferred install prompt was captured
    pub prompt_banner_delay_ms: u64,

    /// Banner delay on iOS, which has no prompt API
    pub ios_banner_delay_ms: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            redirect_to_install: true,
            install_path: "/install".to_string(),
            dismiss_ttl_hours: 168, // 7 days
            prompt_banner_delay_ms: 800,
            ios_banner_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects followed by the HTTP client
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Reliance/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Filter directive overriding `RUST_LOG`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            filter: None,
        }
    }
}

impl RelianceConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Load `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject configurations that would break offline fallback or loop redirects.
    pub fn validate(&self) -> ConfigResult<()> {
        let worker = &self.worker;
        if worker.version.trim().is_empty() || worker.version.contains(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "worker.version",
                "must be a non-empty tag without whitespace",
            ));
        }
        if !worker.offline_page.starts_with('/') {
            return Err(ConfigError::invalid(
                "worker.offline_page",
                "must be an absolute path",
            ));
        }
        if !worker.precache_urls.contains(&worker.offline_page) {
            return Err(ConfigError::invalid(
                "worker.precache_urls",
                format!("must include the offline page {}", worker.offline_page),
            ));
        }
        if worker.origin.cannot_be_a_base() {
            return Err(ConfigError::invalid(
                "worker.origin",
                format!("{} is not a base URL", worker.origin),
            ));
        }

        let gate = &self.gate;
        for (field, target) in [
            ("gate.public_entry", &gate.public_entry),
            ("gate.landing_path", &gate.landing_path),
        ] {
            // Redirects replace only the path and keep the visitor's query.
            if !target.starts_with('/') || target.contains(&['?', '#'][..]) {
                return Err(ConfigError::invalid(
                    field,
                    format!("{} must be a bare absolute path", target),
                ));
            }
        }
        if !gate.is_public(&gate.public_entry) {
            return Err(ConfigError::invalid(
                "gate.public_entry",
                format!("{} is not listed as public", gate.public_entry),
            ));
        }
        if gate.is_public(&gate.landing_path) {
            return Err(ConfigError::invalid(
                "gate.landing_path",
                format!("{} is public; authenticated visitors would loop", gate.landing_path),
            ));
        }

        if !self.install.install_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "install.install_path",
                "must be an absolute path",
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level {:?}", self.logging.level),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = RelianceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.worker.precache_name(), "precache-v4");
        assert_eq!(config.worker.runtime_name(), "runtime-v4");
        assert!(config.worker.cache_api_reads);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = RelianceConfig::from_json("{}").unwrap();
        assert_eq!(config.worker.version, "v4");
        assert_eq!(config.gate.landing_path, "/calendar");
        assert_eq!(config.install.install_path, "/install");
    }

    #[test]
    fn test_partial_section_override() {
        let config =
            RelianceConfig::from_json(r#"{"worker": {"version": "v5", "cache_api_reads": false}}"#)
                .unwrap();
        assert_eq!(config.worker.partition_names(), vec!["precache-v5", "runtime-v5"]);
        assert!(!config.worker.cache_api_reads);
        assert_eq!(config.worker.offline_page, "/offline.html");
    }

    #[test]
    fn test_rejects_blank_version() {
        let err = RelianceConfig::from_json(r#"{"worker": {"version": " "}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "worker.version", .. }));
    }

    #[test]
    fn test_rejects_offline_page_missing_from_precache() {
        let err = RelianceConfig::from_json(r#"{"worker": {"precache_urls": []}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "worker.precache_urls", .. }));
    }

    #[test]
    fn test_rejects_public_landing_path() {
        let err = RelianceConfig::from_json(r#"{"gate": {"landing_path": "/auth/callback"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "gate.landing_path", .. }));
    }

    #[test]
    fn test_rejects_redirect_target_with_query() {
        let err = RelianceConfig::from_json(r#"{"gate": {"landing_path": "/calendar?view=week"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "gate.landing_path", .. }));

        let err = RelianceConfig::from_json(
            r#"{"gate": {"public_paths": ["/", "/welcome#top"], "public_entry": "/welcome#top"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "gate.public_entry", .. }));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let err = RelianceConfig::from_json(r#"{"logging": {"level": "loud"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "logging.level", .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RelianceConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"install": {{"install_path": "/get-app"}}}}"#).unwrap();
        let config = RelianceConfig::load(file.path()).unwrap();
        assert_eq!(config.install.install_path, "/get-app");
    }

    #[test]
    fn test_path_is_within() {
        assert!(path_is_within("/", "/"));
        assert!(!path_is_within("/calendar", "/"));
        assert!(path_is_within("/auth/callback", "/auth/callback"));
        assert!(path_is_within("/auth/callback/google", "/auth/callback"));
        assert!(!path_is_within("/auth/callbacks", "/auth/callback"));
        assert!(path_is_within("/task/new", "/task/"));
        assert!(!path_is_within("/tasks", "/task"));
    }

    #[test]
    fn test_gate_path_lists() {
        let gate = GateConfig::default();
        assert!(gate.is_public("/"));
        assert!(gate.is_public("/auth/callback"));
        assert!(!gate.is_public("/calendar"));
        assert!(gate.is_protected("/reminders/2024-01-01"));
        assert!(!gate.is_protected("/install"));
    }
}
