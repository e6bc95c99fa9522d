//! Reliance operator CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Show how requests would be routed and gated
//! reliance classify http://localhost:3000/_next/static/chunk.js /calendar
//!
//! # Install a worker against a running app and serve URLs through it
//! reliance probe --config reliance.json http://localhost:3000/api/reminders
//!
//! # Validate configuration and print the effective settings
//! reliance check-config --config reliance.json
//! ```

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use reliance_common::{init_logging, LogConfig, LogFormat, RelianceConfig};

#[derive(Parser)]
#[command(name = "reliance")]
#[command(about = "Inspect and exercise the Reliance offline shell", version)]
struct Cli {
    /// Log output format (defaults to the configured one)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    /// More logging; repeat for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the route and gate treatment of each URL
    Classify {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Classify as navigations
        #[arg(long)]
        navigate: bool,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Absolute URLs, or paths resolved against the configured origin
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Install and activate a worker against the network, then fetch each
    /// URL through it twice
    Probe {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Fetch as navigations
        #[arg(long)]
        navigate: bool,
        /// Absolute URLs, or paths resolved against the configured origin
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Validate configuration and print the effective settings
    CheckConfig {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Commands {
    fn config_path(&self) -> Option<&PathBuf> {
        match self {
            Commands::Classify { config, .. }
            | Commands::Probe { config, .. }
            | Commands::CheckConfig { config } => config.as_ref(),
        }
    }
}

fn log_config(cli: &Cli, config: &RelianceConfig) -> LogConfig {
    let log = LogConfig::from(&config.logging).with_verbosity(cli.verbose);
    match cli.log_format {
        Some(format) => log.with_format(format.into()),
        None => log,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RelianceConfig::load_or_default(cli.command.config_path().map(PathBuf::as_path))?;
    init_logging(&log_config(&cli, &config))?;

    match cli.command {
        Commands::Classify {
            navigate,
            method,
            urls,
            ..
        } => commands::classify(&config, &urls, &method, navigate)?,
        Commands::Probe { navigate, urls, .. } => commands::probe(&config, &urls, navigate).await?,
        Commands::CheckConfig { .. } => commands::check_config(&config)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_parse_classify() {
        let cli = Cli::try_parse_from([
            "reliance",
            "-vv",
            "--log-format",
            "json",
            "classify",
            "--navigate",
            "/calendar",
            "/_next/static/chunk.js",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, Some(LogFormatArg::Json));
        match cli.command {
            Commands::Classify {
                navigate,
                method,
                urls,
                config,
            } => {
                assert!(navigate);
                assert_eq!(method, "GET");
                assert_eq!(urls.len(), 2);
                assert!(config.is_none());
            }
            _ => panic!("expected classify"),
        }
    }

    #[test]
    fn test_urls_required() {
        assert!(Cli::try_parse_from(["reliance", "probe"]).is_err());
    }

    #[test]
    fn test_verbose_overrides_level() {
        let cli = Cli::try_parse_from(["reliance", "check-config", "-v"]).unwrap();
        let log = log_config(&cli, &RelianceConfig::default());
        assert_eq!(log.level, Level::DEBUG);
        assert_eq!(log.filter.as_deref(), Some("debug"));
        assert_eq!(log.format, LogFormat::Pretty);
    }
}
