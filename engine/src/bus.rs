//! Event bus for engine telemetry
//!
//! The EventBus provides a pub/sub pattern for observers (operators, tests,
//! alerting integrations) to watch the engine without coupling to it. It
//! uses bounded channels to prevent unbounded memory growth and supports
//! both specific event subscriptions and global "All" subscriptions.
//!
//! Publishing never blocks the orchestration cycle: a subscriber whose
//! channel is full simply misses the event.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event kinds that can be published on the bus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    /// One orchestration cycle finished
    CycleCompleted,
    /// One chief's turn finished (ok or failed)
    TurnCompleted,
    /// A chief was registered
    ChiefRegistered,
    /// A chief was unregistered
    ChiefUnregistered,
    /// The conductor stopped starting new cycles
    ConductorPaused,
    /// The conductor resumed
    ConductorResumed,
    /// A plan tree reached a terminal status
    PlanTreeFinished,
    /// A stalled plan node was reset for retry
    StallRecovered,
    /// Subscribe to all event kinds
    All,
}

/// Events published on the bus
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Cycle summary, published after every non-paused tick
    CycleCompleted {
        tick: u64,
        duration_ms: f64,
        actions_taken: u64,
        chiefs: Vec<String>,
    },
    /// Per-turn summary
    TurnCompleted {
        chief: String,
        tick: u64,
        ok: bool,
        reward: f64,
    },
    /// Chief registered under a name
    ChiefRegistered { name: String, domain: String },
    /// Chief removed from the registry
    ChiefUnregistered { name: String },
    /// Conductor paused
    ConductorPaused,
    /// Conductor resumed
    ConductorResumed,
    /// Plan tree reached completed/failed/cancelled
    PlanTreeFinished { tree_id: String, status: String },
    /// Stalled node reset to ready
    StallRecovered { node_id: String, retries: u32 },
}

impl EngineEvent {
    /// Get the event kind for this event
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::CycleCompleted { .. } => EventKind::CycleCompleted,
            EngineEvent::TurnCompleted { .. } => EventKind::TurnCompleted,
            EngineEvent::ChiefRegistered { .. } => EventKind::ChiefRegistered,
            EngineEvent::ChiefUnregistered { .. } => EventKind::ChiefUnregistered,
            EngineEvent::ConductorPaused => EventKind::ConductorPaused,
            EngineEvent::ConductorResumed => EventKind::ConductorResumed,
            EngineEvent::PlanTreeFinished { .. } => EventKind::PlanTreeFinished,
            EngineEvent::StallRecovered { .. } => EventKind::StallRecovered,
        }
    }
}

/// Bus for pub/sub telemetry between the engine and its observers
///
/// Subscribers pick a specific kind or `EventKind::All`. Channels are
/// bounded; a full or dropped receiver never blocks a publisher.
#[derive(Clone, Default)]
pub struct EventBus {
    /// Map of event kinds to subscriber senders
    channels: Arc<Mutex<HashMap<EventKind, Vec<mpsc::Sender<EngineEvent>>>>>,
}

impl EventBus {
    /// Create a new EventBus
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event kind (or `EventKind::All`)
    ///
    /// Returns a bounded receiver with `CHANNEL_BUFFER_SIZE` capacity.
    pub async fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(kind).or_default().push(tx);
        rx
    }

    /// Publish an event to all matching subscribers
    ///
    /// Uses `try_send` so a slow subscriber drops events rather than
    /// stalling the orchestration cycle.
    pub async fn publish(&self, event: EngineEvent) {
        let channels = self.channels.lock().await;
        let kind = event.kind();

        if let Some(subscribers) = channels.get(&kind) {
            for tx in subscribers {
                if tx.try_send(event.clone()).is_err() {
                    tracing::trace!(?kind, "dropping event for slow or closed subscriber");
                }
            }
        }

        if let Some(subscribers) = channels.get(&EventKind::All) {
            for tx in subscribers {
                if tx.try_send(event.clone()).is_err() {
                    tracing::trace!(?kind, "dropping event for slow or closed subscriber");
                }
            }
        }
    }
}
