//! Logging configuration and setup.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum level when no filter applies.
    pub level: Level,
    pub format: LogFormat,
    /// Print file and line of each event.
    pub include_location: bool,
    /// Log span enter and close.
    pub include_span_events: bool,
    /// Directive string such as `reliance_sw=debug,reqwest=warn`; wins over
    /// `RUST_LOG`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Raise the level by `-v` count: one for DEBUG, more for TRACE with
    /// source locations and span events.
    ///
    /// Any verbosity replaces the configured filter with the plain level.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.level = match verbose {
            0 => return self,
            1 => Level::DEBUG,
            _ => {
                self.include_location = true;
                self.include_span_events = true;
                Level::TRACE
            }
        };
        let level = self.level.to_string().to_lowercase();
        self.with_filter(level)
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match self.filter {
            Some(ref directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(section: &LoggingConfig) -> Self {
        // Unknown level names fall back to INFO; `validate` reports them earlier.
        let level = section.level.parse::<Level>().unwrap_or(Level::INFO);
        Self {
            level,
            format: section.format,
            filter: section.filter.clone(),
            ..Default::default()
        }
    }
}

/// Install the global subscriber.
///
/// Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    let base = fmt::layer()
        .with_target(true)
        .with_span_events(config.span_events());

    match config.format {
        LogFormat::Pretty => registry
            .with(
                base.with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
        LogFormat::Compact => registry.with(base.compact()).try_init(),
        LogFormat::Json => registry.with(base.json()).try_init(),
    }
}
