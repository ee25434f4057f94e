//! Host command loop: parse the `cmd` topic, keep the bounded history, and
//! dispatch. The loop never stops on a failed command.

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::dao::Collaborators;
use crate::dto::command::HostCommand;
use crate::dto::presence::{ControlSignal, TOPIC_COMMANDS, TOPIC_CONTROL};
use crate::dto::record::StageKind;
use crate::error::ServiceError;
use crate::state::SharedState;
use crate::state::events::{NoticeLevel, StationEvent};
use crate::transport::BrokerClient;

use super::stage;

/// Consume the command and control topics for as long as the transport
/// subscription lives. Spawned by the session supervisor on the leader tab
/// and aborted on demotion.
pub async fn run(state: SharedState, client: BrokerClient, collab: Collaborators) {
    let (command_tx, command_rx) = mpsc::unbounded_channel::<String>();
    let _command_sub = client.subscribe(TOPIC_COMMANDS, move |message| {
        let _ = command_tx.send(message.payload.clone());
    });

    let (control_tx, control_rx) = mpsc::unbounded_channel::<String>();
    let _control_sub = client.subscribe(TOPIC_CONTROL, move |message| {
        let _ = control_tx.send(message.payload.clone());
    });

    let mut commands = UnboundedReceiverStream::new(command_rx);
    let mut controls = UnboundedReceiverStream::new(control_rx);

    loop {
        tokio::select! {
            maybe_raw = commands.next() => {
                let Some(raw) = maybe_raw else { break };
                handle_command(&state, &collab, &raw).await;
            }
            maybe_raw = controls.next() => {
                let Some(raw) = maybe_raw else { break };
                handle_control(&state, &raw).await;
            }
        }
    }
}

/// Parse and dispatch one raw command payload.
pub async fn handle_command(state: &SharedState, collab: &Collaborators, raw: &str) {
    let Some(command) = HostCommand::parse(raw) else {
        // Not part of the grammar; logged but never dispatched.
        debug!(raw, "ignoring non-command payload");
        return;
    };

    // Accepted commands enter the history before dispatch, even when the
    // dispatch itself fails later.
    state.history().lock().await.push(raw.trim());
    info!(raw = raw.trim(), "dispatching host command");

    if let Err(err) = dispatch(state, collab, command).await {
        warn!(raw = raw.trim(), error = %err, "host command failed");
        state
            .hub()
            .notice(NoticeLevel::Warning, format!("command failed: {err}"));
    }
}

async fn dispatch(
    state: &SharedState,
    collab: &Collaborators,
    command: HostCommand,
) -> Result<(), ServiceError> {
    match command {
        HostCommand::SelectEvent { index } => stage::select_event(state, collab, index).await,
        HostCommand::ActivateStage { stage_id } => stage::activate(state, collab, &stage_id).await,
        HostCommand::StartGrab => start_grab(state, collab).await,
        HostCommand::JumpToQuestion { index } => jump_to_question(state, index).await,
    }
}

/// `start` is only meaningful on a grab stage whose runtime is still waiting
/// for its first question.
async fn start_grab(state: &SharedState, collab: &Collaborators) -> Result<(), ServiceError> {
    {
        let guard = state.stage().read().await;
        let kind = guard.as_ref().map(|context| context.config.kind);
        if kind != Some(StageKind::Grab) {
            return Err(ServiceError::InvalidState(
                "start only applies to an active grab stage".into(),
            ));
        }
    }
    {
        let guard = state.runtime().read().await;
        let waiting = guard
            .as_ref()
            .is_some_and(|runtime| runtime.waiting_for_start());
        if !waiting {
            return Err(ServiceError::InvalidState(
                "runtime is not waiting for a grab start".into(),
            ));
        }
    }
    stage::fetch_next_question(state, collab).await
}

async fn jump_to_question(state: &SharedState, index: usize) -> Result<(), ServiceError> {
    let snapshot = {
        let mut guard = state.runtime().write().await;
        let Some(runtime) = guard.as_mut() else {
            return Err(ServiceError::InvalidState("no mode selected".into()));
        };
        runtime.jump_to(index)?;
        runtime.snapshot()
    };
    state
        .hub()
        .broadcast(StationEvent::RuntimeChanged { snapshot });
    Ok(())
}

/// Route one auxiliary control payload.
pub async fn handle_control(state: &SharedState, raw: &str) {
    match ControlSignal::parse(raw) {
        ControlSignal::StartBuzzing => {
            let mut guard = state.runtime().write().await;
            let Some(runtime) = guard.as_mut() else {
                debug!("start_buzzing ignored: no mode selected");
                return;
            };
            if let Err(err) = runtime.arm_buzzer() {
                debug!(error = %err, "start_buzzing ignored");
            }
        }
        ControlSignal::JudgedWrong => {
            if let Err(err) = super::submission::host_judged_wrong(state).await {
                debug!(error = %err, "host judgement ignored");
            }
        }
        ControlSignal::Other(signal) => {
            debug!(signal, "unhandled control signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::state::history::COMMAND_HISTORY_CAPACITY;

    fn collaborators() -> Collaborators {
        // Points at a closed port: every call fails fast, which is exactly
        // what the dispatch-failure tests need.
        Collaborators::new("http://127.0.0.1:9").expect("client builds")
    }

    #[tokio::test]
    async fn noise_is_not_recorded_in_history() {
        let state = AppState::new();
        let collab = collaborators();

        handle_command(&state, &collab, "definitely not a command").await;
        assert!(state.history().lock().await.is_empty());
    }

    #[tokio::test]
    async fn accepted_commands_enter_history_even_when_dispatch_fails() {
        let state = AppState::new();
        let collab = collaborators();

        // No event is selected, so activation fails after acceptance.
        handle_command(&state, &collab, "warmup-start").await;
        let history = state.history().lock().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries().next(), Some("warmup-start"));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let state = AppState::new();
        let collab = collaborators();

        for n in 0..COMMAND_HISTORY_CAPACITY + 3 {
            handle_command(&state, &collab, &format!("q{}", n + 1)).await;
        }
        let history = state.history().lock().await;
        assert_eq!(history.len(), COMMAND_HISTORY_CAPACITY);
        assert_eq!(history.entries().next(), Some("q4"));
    }

    #[tokio::test]
    async fn start_buzzing_arms_the_buzzer_mode() {
        let state = AppState::new();
        state
            .install_mode(crate::state::mode::find("ultimate-challenge").unwrap())
            .await;
        {
            let mut guard = state.runtime().write().await;
            let runtime = guard.as_mut().unwrap();
            runtime.load_batch(vec![]);
        }

        // Without a question the machine is still waiting; the signal is
        // dropped silently rather than crashing the loop.
        handle_control(&state, "start_buzzing").await;
        handle_control(&state, "lights_out").await;
    }
}
