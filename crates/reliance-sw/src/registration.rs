//! Installing, waiting and active slots for one scope.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use reliance_net::{Fetcher, NetError, Response};

use crate::lifecycle::ControlMessage;
use crate::worker::{FetchEvent, ServiceWorker};
use crate::ServiceWorkerError;

#[derive(Default)]
struct Slots {
    installing: Option<Arc<ServiceWorker>>,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
}

/// A worker registration.
///
/// Fetches go to the active worker only; without one they go straight to
/// the network.
pub struct Registration {
    scope: Url,
    slots: RwLock<Slots>,
    network: Arc<dyn Fetcher>,
}

impl Registration {
    pub fn new(scope: Url, network: Arc<dyn Fetcher>) -> Self {
        Self {
            scope,
            slots: RwLock::new(Slots::default()),
            network,
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub async fn installing(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().await.active.clone()
    }

    /// Install a new worker version.
    ///
    /// The worker is activated at once when it asked to skip waiting or when
    /// nothing is active; otherwise it waits for [`skip_waiting`](Self::skip_waiting).
    /// A failed install leaves the current active worker serving.
    pub async fn update(&self, worker: ServiceWorker) -> Result<Arc<ServiceWorker>, ServiceWorkerError> {
        let worker = Arc::new(worker);
        info!(scope = %self.scope, worker = %worker.id(), version = worker.version(), "Update found");

        if let Some(previous) = self.slots.write().await.installing.replace(Arc::clone(&worker)) {
            previous.mark_redundant();
        }

        let installed = worker.install().await;
        {
            let mut slots = self.slots.write().await;
            let current = slots
                .installing
                .as_ref()
                .is_some_and(|w| Arc::ptr_eq(w, &worker));
            if current {
                slots.installing = None;
            }
            installed?;
            if !current {
                // Replaced by a newer update, or unregistered, while installing.
                worker.mark_redundant();
                debug!(worker = %worker.id(), "Installed worker was superseded");
                return Err(ServiceWorkerError::StateError(format!(
                    "worker {} was superseded during install",
                    worker.id()
                )));
            }
            if let Some(previous) = slots.waiting.replace(Arc::clone(&worker)) {
                previous.mark_redundant();
            }
        }

        let nothing_active = self.slots.read().await.active.is_none();
        if worker.skip_waiting_requested() || nothing_active {
            self.promote().await?;
        } else {
            debug!(worker = %worker.id(), "Worker waiting for adoption");
        }
        Ok(worker)
    }

    /// Activate the waiting worker now. Returns `false` when none is waiting.
    pub async fn skip_waiting(&self) -> Result<bool, ServiceWorkerError> {
        self.promote().await
    }

    /// Deliver a page message to the waiting worker.
    ///
    /// Returns whether a worker was promoted as a result.
    pub async fn post_message(&self, raw: &str) -> Result<bool, ServiceWorkerError> {
        let Some(message) = ControlMessage::parse(raw) else {
            return Ok(false);
        };
        let Some(waiting) = self.waiting().await else {
            debug!(message = ?message, "No waiting worker for message");
            return Ok(false);
        };
        waiting.handle_message(&message);
        match message {
            ControlMessage::SkipWaiting => self.promote().await,
        }
    }

    async fn promote(&self) -> Result<bool, ServiceWorkerError> {
        // Held across activation so no fetch reaches a half-activated worker.
        let mut slots = self.slots.write().await;
        let Some(next) = slots.waiting.take() else {
            return Ok(false);
        };

        if let Err(e) = next.activate().await {
            warn!(worker = %next.id(), error = %e, "Activation failed");
            next.mark_redundant();
            return Err(e);
        }

        if let Some(old) = slots.active.replace(Arc::clone(&next)) {
            info!(old = %old.id(), new = %next.id(), "Worker replaced");
            old.mark_redundant();
        }
        Ok(true)
    }

    /// Serve a fetch through the active worker, or the network without one.
    pub async fn fetch(&self, event: FetchEvent) -> Result<Response, NetError> {
        match self.active().await {
            Some(worker) => worker.fetch(event).await,
            None => self.network.fetch(&event.request).await,
        }
    }

    /// Drop every worker.
    pub async fn unregister(&self) {
        let mut slots = self.slots.write().await;
        for worker in [
            slots.installing.take(),
            slots.waiting.take(),
            slots.active.take(),
        ]
        .into_iter()
        .flatten()
        {
            worker.mark_redundant();
        }
        info!(scope = %self.scope, "Registration removed");
    }
}
