//! Installed-app detection and the redirect to the install page.

use tracing::{debug, info};

use reliance_common::InstallConfig;

/// What the client reports about itself.
#[derive(Debug, Clone, Default)]
pub struct ClientEnvironment {
    pub user_agent: String,
    /// Document exposes touch events.
    pub touch_events: bool,
    /// `navigator.standalone`, where the browser has it.
    pub navigator_standalone: Option<bool>,
    /// `(display-mode: standalone)` matches.
    pub display_mode_standalone: bool,
}

impl ClientEnvironment {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Self::default()
        }
    }

    /// iPhone, iPad, iPod, or an iPad reporting a desktop user agent.
    pub fn is_ios(&self) -> bool {
        let ua = self.user_agent.as_str();
        let ios_device = ["iPad", "iPhone", "iPod"].iter().any(|d| ua.contains(d));
        let ipad_os = ua.contains("Macintosh") && self.touch_events;
        ios_device || ipad_os
    }

    pub fn is_standalone(&self) -> bool {
        self.navigator_standalone == Some(true) || self.display_mode_standalone
    }
}

/// Events that trigger a recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallEvent {
    Mount,
    DisplayModeChanged,
    AppInstalled,
}

/// Client-side navigation requested by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Replace the current history entry.
    Replace(String),
}

/// Tracks whether the app runs installed.
#[derive(Debug)]
pub struct InstallDetector {
    config: InstallConfig,
    is_ios: bool,
    installed: bool,
    ready: bool,
}

impl InstallDetector {
    /// `is_ios` is fixed here; later environment changes do not affect it.
    pub fn new(config: InstallConfig, env: &ClientEnvironment) -> Self {
        Self {
            config,
            is_ios: env.is_ios(),
            installed: false,
            ready: false,
        }
    }

    pub fn is_ios(&self) -> bool {
        self.is_ios
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Whether a client-derived value is available yet.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Recompute install state.
    ///
    /// `current_path` is `None` when the router has not resolved a path; no
    /// redirect is issued then, nor when already on the install page.
    pub fn handle(
        &mut self,
        event: InstallEvent,
        env: &ClientEnvironment,
        current_path: Option<&str>,
    ) -> Option<Navigation> {
        self.installed = env.is_standalone();
        self.ready = true;
        debug!(event = ?event, installed = self.installed, "Install state recomputed");

        if self.installed || !self.config.redirect_to_install {
            return None;
        }
        match current_path {
            Some(path) if path != self.config.install_path => {
                info!(from = path, to = %self.config.install_path, "Redirecting to install page");
                Some(Navigation::Replace(self.config.install_path.clone()))
            }
            _ => None,
        }
    }
}
