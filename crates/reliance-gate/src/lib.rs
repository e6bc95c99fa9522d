//! # Reliance Gate
//!
//! Decides, before any page renders, whether a visitor may see it.
//!
//! ## Features
//!
//! - **Edge gate**: per-navigation session check with redirects between the
//!   public entry and the authenticated landing page
//! - **Install detection**: standalone display detection and the redirect to
//!   the install page
//! - **Install prompt**: deferred install prompt, banner timing, dismissal
//!
//! ## Architecture
//!
//! ```text
//! navigation ──> EdgeGate ──> SessionResolver
//!                   │
//!                   └── GateOutcome { decision, cookies_to_set }
//!                           └── into_response (307 or pass-through)
//!
//! client mount ──> InstallDetector ──> Navigation::Replace(install_path)
//!             └──> InstallPromptController ──> DeferredPrompt
//!                                        └──> DismissalStore
//! ```

pub mod cookie;
pub mod edge;
pub mod install;
pub mod prompt;
pub mod user;

pub use cookie::{SameSite, SetCookie};
pub use edge::{
    EdgeGate, GateDecision, GateOutcome, GateRequest, PathKind, SessionResolution, SessionResolver,
};
pub use install::{ClientEnvironment, InstallDetector, InstallEvent, Navigation};
pub use prompt::{
    DeferredPrompt, DismissalStore, FileDismissalStore, InstallPromptController,
    MemoryDismissalStore, PromptResult, UserChoice,
};
pub use user::{is_authenticated, AuthenticatedUser};

use thiserror::Error;

/// Errors raised by the gate.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Session lookup failed: {0}")]
    Session(String),

    #[error("Invalid user: {0}")]
    InvalidUser(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("Failed to build response: {0}")]
    Http(#[from] http::Error),

    #[error("Install prompt failed: {0}")]
    Prompt(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
