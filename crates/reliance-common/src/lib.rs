//! # Reliance Common
//!
//! Configuration, shared error types, and logging setup for the Reliance
//! offline shell and edge gate.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    path_is_within, GateConfig, InstallConfig, LoggingConfig, NetworkConfig, RelianceConfig,
    UnlistedPolicy, WorkerConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, LogConfig, LogFormat};
