pub mod evaluate;
pub mod events;
pub mod history;
pub mod machine;
pub mod mode;
pub mod runtime;
pub mod timer;

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, watch};

use crate::dto::record::{EventRecord, StageConfig};
use crate::state::events::EventHub;
use crate::state::history::CommandHistory;
use crate::state::mode::ContestMode;
use crate::state::runtime::QuizRuntime;

/// Cheaply clonable handle to the application state.
pub type SharedState = Arc<AppState>;

const EVENT_HUB_CAPACITY: usize = 32;

/// Selected event and its stage list, replaced by each `race-<N>` command.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Zero-based event ordinal the host selected.
    pub ordinal: usize,
    /// The event record with its stages.
    pub record: EventRecord,
}

impl EventContext {
    /// Find a stage of the selected event by its short id.
    pub fn stage(&self, stage_id: &str) -> Option<&StageConfig> {
        self.record
            .stages
            .iter()
            .find(|stage| stage.stage_id == stage_id)
    }
}

/// Activated stage plus the outcome of its data-source resolution. Replaced
/// wholesale on each activation.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The stage configuration.
    pub config: StageConfig,
    /// Terminal question-load error, when the retries were exhausted.
    pub load_error: Option<String>,
    /// Whether the question set arrived.
    pub questions_loaded: bool,
}

/// Result of scanning the team and score sheets for the local contestant.
#[derive(Debug, Clone, Default)]
pub struct RosterResolution {
    /// Record id of the contestant's team/profile row.
    pub team_record_id: Option<String>,
    /// Record id of the contestant's score row.
    pub score_record_id: Option<String>,
    /// Stored team-resolution error, if the scan failed.
    pub team_error: Option<String>,
    /// Stored score-resolution error, if the scan failed.
    pub score_error: Option<String>,
}

/// Identity of the logged-in contestant, loaded from the local session store.
#[derive(Debug, Clone)]
pub struct StationIdentity {
    /// Platform user id used for roster scans.
    pub user_id: String,
}

/// Central state container, shared by every service.
pub struct AppState {
    runtime: RwLock<Option<QuizRuntime>>,
    event: RwLock<Option<EventContext>>,
    stage: RwLock<Option<StageContext>>,
    roster: RwLock<RosterResolution>,
    history: Mutex<CommandHistory>,
    identity: RwLock<Option<StationIdentity>>,
    hub: EventHub,
    stage_gate: watch::Sender<bool>,
}

impl AppState {
    /// Construct the shared state. The stage gate starts released: nothing is
    /// waiting until a stage activation begins.
    pub fn new() -> SharedState {
        let (stage_gate, _rx) = watch::channel(false);
        Arc::new(Self {
            runtime: RwLock::new(None),
            event: RwLock::new(None),
            stage: RwLock::new(None),
            roster: RwLock::new(RosterResolution::default()),
            history: Mutex::new(CommandHistory::new()),
            identity: RwLock::new(None),
            hub: EventHub::new(EVENT_HUB_CAPACITY),
            stage_gate,
        })
    }

    /// The quiz runtime slot. `None` until a mode has been selected.
    pub fn runtime(&self) -> &RwLock<Option<QuizRuntime>> {
        &self.runtime
    }

    /// Replace the runtime for a freshly selected mode. The previous
    /// runtime's timer task dies with it.
    pub async fn install_mode(&self, mode: &'static ContestMode) {
        let mut slot = self.runtime.write().await;
        *slot = Some(QuizRuntime::new(mode));
    }

    /// Currently selected event, if any.
    pub fn event(&self) -> &RwLock<Option<EventContext>> {
        &self.event
    }

    /// Currently activated stage, if any.
    pub fn stage(&self) -> &RwLock<Option<StageContext>> {
        &self.stage
    }

    /// Roster resolution results.
    pub fn roster(&self) -> &RwLock<RosterResolution> {
        &self.roster
    }

    /// Bounded history of accepted host commands.
    pub fn history(&self) -> &Mutex<CommandHistory> {
        &self.history
    }

    /// Contestant identity slot.
    pub fn identity(&self) -> &RwLock<Option<StationIdentity>> {
        &self.identity
    }

    /// Convenience accessor for the contestant's user id.
    pub async fn user_id(&self) -> Option<String> {
        self.identity
            .read()
            .await
            .as_ref()
            .map(|identity| identity.user_id.clone())
    }

    /// Event hub feeding the rendering surface.
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Raise the waiting-for-stage-start gate.
    pub fn hold_stage_gate(&self) {
        let _ = self.stage_gate.send(true);
    }

    /// Release the waiting-for-stage-start gate. Always called when a stage
    /// activation settles, success or not, so the surface is never stuck.
    pub fn release_stage_gate(&self) {
        let _ = self.stage_gate.send(false);
    }

    /// Observe the waiting-for-stage-start gate.
    pub fn stage_gate(&self) -> watch::Receiver<bool> {
        self.stage_gate.subscribe()
    }
}
