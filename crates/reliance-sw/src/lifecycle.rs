//! Worker lifecycle states, control messages, and host capabilities.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use url::Url;

use crate::ServiceWorkerError;

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Populating the precache.
    Installing,
    /// Installed, waiting to take over.
    Installed,
    /// Cleaning stale partitions and claiming clients.
    Activating,
    /// Active and serving fetches.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// Messages pages post to a worker.
///
/// Wire form: `{"type":"SKIP_WAITING"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Adopt this worker now instead of waiting for old clients to go away.
    SkipWaiting,
}

impl ControlMessage {
    /// Parse a posted message; anything unrecognized is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                trace!(error = %e, "Ignoring unrecognized control message");
                None
            }
        }
    }
}

/// Messages a worker posts to its clients.
///
/// Wire form: `{"type":"SW_READY","version":"v4"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    SwReady { version: String },
}

/// Capabilities the hosting platform offers a worker during activation.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Turn on navigation preload. Hosts without support return an error.
    async fn enable_navigation_preload(&self) -> Result<(), ServiceWorkerError>;

    /// Make `worker` the controller of every open client.
    async fn claim_clients(&self, worker: WorkerId) -> Result<(), ServiceWorkerError>;

    /// Deliver `message` to clients; returns how many received it.
    async fn post_to_clients(
        &self,
        message: &ClientMessage,
        include_uncontrolled: bool,
    ) -> Result<usize, ServiceWorkerError>;
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Worker currently controlling this client.
    pub controller: Option<WorkerId>,
}

/// Events emitted by [`LocalPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// Controller changed.
    ControllerChange { client_id: String, worker: WorkerId },
    /// Message delivered to a client.
    Message {
        client_id: String,
        message: ClientMessage,
    },
    /// Navigation preload switched on.
    NavigationPreloadEnabled,
}

/// In-process [`Platform`] that tracks clients and reports what happened.
pub struct LocalPlatform {
    preload_supported: bool,
    preload_enabled: AtomicBool,
    clients: RwLock<HashMap<String, Client>>,
    event_tx: mpsc::UnboundedSender<PlatformEvent>,
}

impl LocalPlatform {
    /// Create a platform; events are delivered on the returned receiver.
    pub fn new(preload_supported: bool) -> (Self, mpsc::UnboundedReceiver<PlatformEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                preload_supported,
                preload_enabled: AtomicBool::new(false),
                clients: RwLock::new(HashMap::new()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Open a client at `url`; it starts uncontrolled.
    pub async fn open_client(&self, url: Url) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        self.clients.write().await.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                controller: None,
            },
        );
        id
    }

    /// Remove a client.
    pub async fn close_client(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    /// Get a client by ID.
    pub async fn client(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    pub fn navigation_preload_enabled(&self) -> bool {
        self.preload_enabled.load(Ordering::Acquire)
    }

    fn emit(&self, event: PlatformEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }
}

#[async_trait]
impl Platform for LocalPlatform {
    async fn enable_navigation_preload(&self) -> Result<(), ServiceWorkerError> {
        if !self.preload_supported {
            return Err(ServiceWorkerError::Unsupported("navigation preload"));
        }
        if !self.preload_enabled.swap(true, Ordering::AcqRel) {
            self.emit(PlatformEvent::NavigationPreloadEnabled);
        }
        Ok(())
    }

    async fn claim_clients(&self, worker: WorkerId) -> Result<(), ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                self.emit(PlatformEvent::ControllerChange {
                    client_id: client.id.clone(),
                    worker,
                });
            }
        }
        debug!(worker = %worker, clients = clients.len(), "Claimed clients");
        Ok(())
    }

    async fn post_to_clients(
        &self,
        message: &ClientMessage,
        include_uncontrolled: bool,
    ) -> Result<usize, ServiceWorkerError> {
        let clients = self.clients.read().await;
        let mut delivered = 0;
        for client in clients.values() {
            if !include_uncontrolled && client.controller.is_none() {
                continue;
            }
            self.emit(PlatformEvent::Message {
                client_id: client.id.clone(),
                message: message.clone(),
            });
            delivered += 1;
        }
        Ok(delivered)
    }
}
