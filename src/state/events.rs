use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::evaluate::Verdict;
use crate::state::runtime::RuntimeSnapshot;
use crate::transport::ConnectionStatus;

/// Severity of a transient notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Informational.
    Info,
    /// Something failed but the flow continues.
    Warning,
}

/// Events pushed to the rendering surface.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StationEvent {
    /// Transient human-readable notice.
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Message text.
        message: String,
    },
    /// The broker connection changed state.
    ConnectionChanged {
        /// New connection status.
        status: ConnectionStatus,
    },
    /// This tab gained or lost channel ownership.
    LeadershipChanged {
        /// Whether this tab is now the leader.
        leader: bool,
    },
    /// The runtime state changed in a way the surface should rerender.
    RuntimeChanged {
        /// Fresh runtime snapshot.
        snapshot: RuntimeSnapshot,
    },
    /// Periodic countdown tick.
    TimeTick {
        /// Remaining milliseconds.
        remaining_ms: u64,
        /// Elapsed milliseconds.
        elapsed_ms: u64,
    },
    /// The global countdown ran out.
    TimeExpired,
    /// A stage finished activating.
    StageActivated {
        /// Activated stage id.
        stage_id: String,
    },
    /// A local verdict is available for a submission.
    VerdictReady {
        /// Question the verdict belongs to.
        question_key: String,
        /// The verdict.
        verdict: Verdict,
    },
}

/// Broadcast hub wrapper, dropping events when nobody listens.
pub struct EventHub {
    sender: broadcast::Sender<StationEvent>,
}

impl EventHub {
    /// Hub backed by a broadcast channel of the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber receiving subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: StationEvent) {
        let _ = self.sender.send(event);
    }

    /// Shorthand for a notice event.
    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.broadcast(StationEvent::Notice {
            level,
            message: message.into(),
        });
    }
}
