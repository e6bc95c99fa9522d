//! # Reliance Offline Worker
//!
//! Request interception and offline support for the Reliance app shell.
//!
//! ## Features
//!
//! - **Versioned caches**: `precache-<version>` and `runtime-<version>`
//!   partitions; bumping the version tag is the only invalidation
//! - **Routing**: classify every intercepted request to a fetch strategy or
//!   a pass-through
//! - **Strategies**: cache-first, stale-while-revalidate, network-first,
//!   navigation with offline page
//! - **Lifecycle**: install (precache), activate (cleanup, claim, announce),
//!   skip-waiting adoption
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing (ServiceWorker)
//!     ├── waiting (ServiceWorker)
//!     └── active (ServiceWorker)
//!             ├── Router ── Route
//!             ├── StrategyEngine ── Fetcher (network)
//!             └── Platform (preload, clients)
//!
//! CacheStorage
//!     └── Partition
//!             └── CacheKey → CacheEntry
//! ```

pub mod cache;
pub mod lifecycle;
pub mod registration;
pub mod router;
pub mod strategy;
pub mod worker;

pub use cache::{CacheEntry, CacheKey, CacheStorage, Partition, StatsSnapshot};
pub use lifecycle::{
    ClientMessage, ControlMessage, LocalPlatform, Platform, PlatformEvent, WorkerId, WorkerState,
};
pub use registration::Registration;
pub use router::{PassthroughReason, Route, Router};
pub use strategy::{Preload, Strategy, StrategyEngine, OFFLINE_JSON};
pub use worker::{FetchEvent, FetchOutcome, ServiceWorker};

use reliance_net::NetError;
use thiserror::Error;

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Precache of {url} failed: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Not supported by this platform: {0}")]
    Unsupported(&'static str),

    #[error("Platform error: {0}")]
    Platform(String),
}
