//! Worker lifecycle and event dispatch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use swcache_net::Request;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::context::WorkerContext;
use crate::generation::ActivationReport;
use crate::keepalive::ExtendableEvent;
use crate::router::Route;
use crate::WorkerError;

// ==================== Types ====================

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Evaluated, not yet installed.
    #[default]
    Parsed,
    /// Populating its generation.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Deleting superseded generations.
    Activating,
    /// Handling fetches.
    Activated,
    /// Install failed.
    Redundant,
}

/// Commands accepted on the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Activate as soon as installed and claim clients.
    SkipWaiting,
    /// Delete the mutation cache's backing database.
    CleanIndexedDb,
}

impl WorkerMessage {
    /// Recognize a message; anything else is `None`.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "skipWaiting" => Some(Self::SkipWaiting),
            "cleanIndexedDB" => Some(Self::CleanIndexedDb),
            _ => None,
        }
    }
}

/// Worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        worker_id: WorkerId,
        new_state: WorkerState,
    },
    /// A superseded generation was deleted during activation.
    GenerationDeleted { label: String },
    /// The worker took control of open clients.
    ClientsClaimed { worker_id: WorkerId },
    /// The mutation cache was emptied.
    MutationCachePurged,
}

// ==================== Worker ====================

/// One evaluation of the caching worker.
pub struct Worker {
    id: WorkerId,
    context: Arc<WorkerContext>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    clients_claimed: AtomicBool,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl Worker {
    /// Create a worker over `context`, with the receiver of its events.
    pub fn new(context: WorkerContext) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Self {
            id: WorkerId::new(),
            context: Arc::new(context),
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            clients_claimed: AtomicBool::new(false),
            event_tx,
        };
        (worker, event_rx)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.context
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    /// Whether the worker has claimed its clients.
    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::SeqCst)
    }

    /// Populate the worker's generation from the asset manifest.
    ///
    /// A failure leaves the worker `Redundant`. When `skipWaiting` was
    /// received earlier the worker activates right away.
    pub async fn install(&self) -> Result<(), WorkerError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)?;

        if let Err(e) = self.context.generations.install(&self.context.config.assets).await {
            warn!(worker = self.id.0, error = %e, "Install failed");
            self.set_state(WorkerState::Redundant);
            return Err(e);
        }
        self.set_state(WorkerState::Installed);

        if self.skip_waiting.load(Ordering::SeqCst) {
            self.activate().await?;
        }
        Ok(())
    }

    /// Delete superseded generations and start handling fetches.
    ///
    /// If the cleanup itself cannot start the worker stays `Installed`.
    pub async fn activate(&self) -> Result<ActivationReport, WorkerError> {
        self.transition(WorkerState::Installed, WorkerState::Activating)?;

        let report = match self.context.generations.activate().await {
            Ok(report) => report,
            Err(e) => {
                warn!(worker = self.id.0, error = %e, "Activation failed");
                self.set_state(WorkerState::Installed);
                return Err(e);
            }
        };

        for label in &report.deleted {
            self.emit(WorkerEvent::GenerationDeleted {
                label: label.clone(),
            });
        }
        self.set_state(WorkerState::Activated);

        if self.skip_waiting.load(Ordering::SeqCst) {
            self.claim_clients();
        }
        Ok(report)
    }

    /// Route an intercepted request. Nothing is intercepted before
    /// activation.
    pub fn handle_fetch(&self, request: Request, keep_alive: &ExtendableEvent) -> Route {
        if !self.is_active() {
            trace!(url = %request.url, state = ?self.state(), "Worker not active, passing through");
            return Route::Passthrough(request);
        }
        self.context.router.route(request, keep_alive)
    }

    /// Handle a message posted to the worker. Unknown messages are ignored.
    pub async fn handle_message(&self, data: &str) -> Result<(), WorkerError> {
        let Some(message) = WorkerMessage::parse(data) else {
            trace!(data, "Ignoring unknown message");
            return Ok(());
        };
        debug!(worker = self.id.0, ?message, "Message received");

        match message {
            WorkerMessage::SkipWaiting => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                match self.state() {
                    WorkerState::Installed => {
                        self.activate().await?;
                    }
                    WorkerState::Activated => self.claim_clients(),
                    state => debug!(?state, "Activation deferred until installed"),
                }
            }
            WorkerMessage::CleanIndexedDb => {
                self.context.mutations.purge().await?;
                self.emit(WorkerEvent::MutationCachePurged);
            }
        }
        Ok(())
    }

    fn claim_clients(&self) {
        if !self.clients_claimed.swap(true, Ordering::SeqCst) {
            info!(worker = self.id.0, "Clients claimed");
            self.emit(WorkerEvent::ClientsClaimed { worker_id: self.id });
        }
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), WorkerError> {
        {
            let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state != from {
                return Err(WorkerError::StateError(format!(
                    "cannot move to {:?} from {:?}",
                    to, *state
                )));
            }
            *state = to;
        }
        self.announce(to);
        Ok(())
    }

    fn set_state(&self, to: WorkerState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = to;
        self.announce(to);
    }

    fn announce(&self, new_state: WorkerState) {
        debug!(worker = self.id.0, state = ?new_state, "State changed");
        self.emit(WorkerEvent::StateChange {
            worker_id: self.id,
            new_state,
        });
    }

    fn emit(&self, event: WorkerEvent) {
        // The host may have dropped the receiver.
        let _ = self.event_tx.send(event);
    }
}
