//! Install prompt and banner.
//!
//! Time is passed in by the caller; delays are returned for the caller to
//! schedule, after which it calls [`InstallPromptController::banner_due`].

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reliance_common::InstallConfig;

use crate::GateError;

/// Outcome of the browser's install dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserChoice {
    Accepted,
    Dismissed,
}

/// A captured `beforeinstallprompt` event.
#[async_trait]
pub trait DeferredPrompt: Send + Sync {
    /// Show the browser's install dialog and wait for the choice.
    async fn prompt(&self) -> Result<UserChoice, GateError>;
}

/// What [`InstallPromptController::prompt_install`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResult {
    /// iOS has no prompt API; the instructions modal was opened.
    IosInstructions,
    Accepted,
    Dismissed,
    /// No prompt was captured.
    Unavailable,
}

/// Persistence for the banner's "dismissed until" instant.
pub trait DismissalStore: Send + Sync {
    fn dismissed_until(&self) -> Option<DateTime<Utc>>;
    fn set_dismissed_until(&self, until: DateTime<Utc>) -> Result<(), GateError>;
}

#[derive(Debug, Default)]
pub struct MemoryDismissalStore {
    until: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryDismissalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DismissalStore for MemoryDismissalStore {
    fn dismissed_until(&self) -> Option<DateTime<Utc>> {
        *self.until.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_dismissed_until(&self, until: DateTime<Utc>) -> Result<(), GateError> {
        *self.until.lock().unwrap_or_else(PoisonError::into_inner) = Some(until);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct DismissalRecord {
    dismissed_until: DateTime<Utc>,
}

/// JSON file store. A missing or unreadable file means "not dismissed".
#[derive(Debug, Clone)]
pub struct FileDismissalStore {
    path: PathBuf,
}

impl FileDismissalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DismissalStore for FileDismissalStore {
    fn dismissed_until(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<DismissalRecord>(&raw) {
            Ok(record) => Some(record.dismissed_until),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Ignoring malformed dismissal record");
                None
            }
        }
    }

    fn set_dismissed_until(&self, until: DateTime<Utc>) -> Result<(), GateError> {
        let json = serde_json::to_string(&DismissalRecord {
            dismissed_until: until,
        })
        .map_err(|e| GateError::Storage(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| GateError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

/// Drives the install banner and the install action.
pub struct InstallPromptController {
    config: InstallConfig,
    is_ios: bool,
    installed: bool,
    supports_prompt: bool,
    deferred: Option<Box<dyn DeferredPrompt>>,
    show_banner: bool,
    show_ios_modal: bool,
    store: Box<dyn DismissalStore>,
}

impl InstallPromptController {
    pub fn new(config: InstallConfig, is_ios: bool, store: Box<dyn DismissalStore>) -> Self {
        Self {
            config,
            is_ios,
            installed: false,
            supports_prompt: false,
            deferred: None,
            show_banner: false,
            show_ios_modal: false,
            store,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn supports_prompt(&self) -> bool {
        self.supports_prompt
    }

    pub fn show_ios_modal(&self) -> bool {
        self.show_ios_modal
    }

    pub fn set_ios_modal(&mut self, open: bool) {
        self.show_ios_modal = open;
    }

    /// Whether the banner is on screen.
    pub fn banner_visible(&self) -> bool {
        self.show_banner && !self.installed && (self.is_ios || self.supports_prompt)
    }

    fn banner_dismissed(&self, now: DateTime<Utc>) -> bool {
        self.store.dismissed_until().is_some_and(|until| now < until)
    }

    fn banner_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.installed && !self.banner_dismissed(now)
    }

    /// Initial state. Returns the iOS banner delay when one should be scheduled.
    pub fn mount(&mut self, installed: bool, now: DateTime<Utc>) -> Option<Duration> {
        self.display_mode_changed(installed);
        if self.is_ios && self.banner_eligible(now) {
            return Some(Duration::from_millis(self.config.ios_banner_delay_ms));
        }
        None
    }

    pub fn display_mode_changed(&mut self, installed: bool) {
        self.installed = installed;
        if installed {
            self.show_banner = false;
        }
    }

    /// Keep a deferred prompt. Returns the banner delay when one should be scheduled.
    pub fn capture_prompt(
        &mut self,
        prompt: Box<dyn DeferredPrompt>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        self.deferred = Some(prompt);
        self.supports_prompt = true;
        debug!("Install prompt captured");
        if self.banner_eligible(now) {
            return Some(Duration::from_millis(self.config.prompt_banner_delay_ms));
        }
        None
    }

    /// A scheduled banner delay elapsed.
    pub fn banner_due(&mut self, now: DateTime<Utc>) {
        if self.banner_eligible(now) {
            self.show_banner = true;
        }
    }

    /// Hide the banner and keep it hidden for the configured TTL.
    pub fn dismiss_banner(&mut self, now: DateTime<Utc>) {
        self.show_banner = false;
        let ttl = i64::try_from(self.config.dismiss_ttl_hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .unwrap_or(TimeDelta::MAX);
        let until = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        if let Err(e) = self.store.set_dismissed_until(until) {
            warn!(error = %e, "Failed to persist banner dismissal");
        }
    }

    /// The banner's install action.
    pub async fn prompt_install(&mut self) -> Result<PromptResult, GateError> {
        if self.is_ios {
            self.show_ios_modal = true;
            return Ok(PromptResult::IosInstructions);
        }
        let Some(prompt) = self.deferred.as_ref() else {
            debug!("No deferred install prompt available");
            return Ok(PromptResult::Unavailable);
        };

        let choice = match prompt.prompt().await {
            Ok(choice) => choice,
            Err(e) => {
                warn!(error = %e, "Install prompt failed");
                return Err(e);
            }
        };
        info!(choice = ?choice, "Install prompt answered");

        // A prompt can only be shown once.
        self.deferred = None;
        Ok(match choice {
            UserChoice::Accepted => {
                self.show_banner = false;
                PromptResult::Accepted
            }
            UserChoice::Dismissed => PromptResult::Dismissed,
        })
    }

    pub fn app_installed(&mut self) {
        self.installed = true;
        self.show_banner = false;
        self.deferred = None;
    }
}
