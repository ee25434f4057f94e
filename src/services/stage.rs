//! Stage and event activation workflow.
//!
//! Activating a stage resolves its data sources with bounded retries and
//! resolves the contestant's team and score records. The three resolutions
//! are independent; a failure in one never blocks the others, and the
//! waiting-for-stage-start gate is always released so the surface cannot get
//! stuck.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::dao::Collaborators;
use crate::dto::record::{EventRecord, StageConfig, StageKind};
use crate::error::ServiceError;
use crate::state::events::{NoticeLevel, StationEvent};
use crate::state::{EventContext, SharedState, StageContext};

/// Backoff schedule between retry attempts.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Run an operation with the stage-load retry policy: one initial attempt,
/// then one retry after each backoff delay. Any success halts the schedule
/// immediately; the last error becomes terminal.
pub async fn with_retry<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err = match op().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        warn!(label, attempt = attempt + 1, error = %last_err, "retrying after backoff");
        sleep(*delay).await;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => last_err = err,
        }
    }

    Err(last_err)
}

/// Select the event with the given zero-based ordinal: load its stage list
/// and kick off the team-profile resolution when a user id is known.
pub async fn select_event(
    state: &SharedState,
    collab: &Collaborators,
    index: usize,
) -> Result<(), ServiceError> {
    let events = collab.sheets.fetch_events().await?;
    let count = events.len();
    let Some(record) = events.into_iter().nth(index) else {
        return Err(ServiceError::NotFound(format!(
            "event ordinal {index} out of range (got {count})"
        )));
    };
    info!(ordinal = index, event = %record.name, stages = record.stages.len(), "event selected");

    let general_sheet = event_general_sheet(&record).map(str::to_string);
    {
        let mut slot = state.event().write().await;
        *slot = Some(EventContext {
            ordinal: index,
            record,
        });
    }

    if let (Some(sheet_id), Some(user_id)) = (general_sheet, state.user_id().await) {
        let state = state.clone();
        let sheets = collab.sheets.clone();
        tokio::spawn(async move {
            crate::services::roster::resolve_team(&state, &sheets, &sheet_id, &user_id).await;
        });
    }

    Ok(())
}

/// First general sheet configured by the event's stages.
fn event_general_sheet(record: &EventRecord) -> Option<&str> {
    record
        .stages
        .iter()
        .find_map(|stage| stage.general_sheet_id.as_deref())
}

/// Run the stage activation workflow for a stage of the selected event.
pub async fn activate(
    state: &SharedState,
    collab: &Collaborators,
    stage_id: &str,
) -> Result<(), ServiceError> {
    let config = {
        let guard = state.event().read().await;
        let Some(context) = guard.as_ref() else {
            return Err(ServiceError::InvalidState(
                "no event selected; send race-<N> first".into(),
            ));
        };
        context
            .stage(stage_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("unknown stage `{stage_id}`")))?
    };

    info!(stage_id, kind = ?config.kind, "activating stage");
    state.hold_stage_gate();
    {
        let mut slot = state.stage().write().await;
        *slot = Some(StageContext {
            config: config.clone(),
            load_error: None,
            questions_loaded: false,
        });
    }

    let user_id = state.user_id().await;

    let questions = resolve_questions(state, collab, &config);
    let team = resolve_team_source(state, collab, &config, user_id.as_deref());
    let score = resolve_score_source(state, collab, &config, user_id.as_deref());
    tokio::join!(questions, team, score);

    state.hub().broadcast(StationEvent::StageActivated {
        stage_id: stage_id.to_string(),
    });
    Ok(())
}

/// Fetch the question set of a standard stage with the retry policy. The
/// gate is released in every path, exhausted retries included.
async fn resolve_questions(state: &SharedState, collab: &Collaborators, config: &StageConfig) {
    if config.kind != StageKind::Standard {
        state.release_stage_gate();
        return;
    }
    let Some(sheet_id) = config.question_sheet_id.as_deref() else {
        warn!(stage_id = %config.stage_id, "standard stage has no question sheet");
        state.release_stage_gate();
        return;
    };

    let outcome = with_retry("stage-question-set", || collab.bank.fetch_set(sheet_id)).await;
    match outcome {
        Ok(questions) => {
            info!(stage_id = %config.stage_id, count = questions.len(), "question set loaded");
            {
                let mut guard = state.runtime().write().await;
                match guard.as_mut() {
                    Some(runtime) => runtime.load_batch(questions),
                    None => warn!(stage_id = %config.stage_id, "no mode selected; question set discarded"),
                }
            }
            let mut guard = state.stage().write().await;
            if let Some(stage) = guard.as_mut() {
                stage.questions_loaded = true;
            }
        }
        Err(err) => {
            warn!(stage_id = %config.stage_id, error = %err, "question set load failed terminally");
            let mut guard = state.stage().write().await;
            if let Some(stage) = guard.as_mut() {
                stage.load_error = Some(err.to_string());
            }
            drop(guard);
            state.hub().notice(
                NoticeLevel::Warning,
                format!("failed to load questions for stage {}", config.stage_id),
            );
        }
    }
    state.release_stage_gate();
}

async fn resolve_team_source(
    state: &SharedState,
    collab: &Collaborators,
    config: &StageConfig,
    user_id: Option<&str>,
) {
    if let (Some(sheet_id), Some(user_id)) = (config.general_sheet_id.as_deref(), user_id) {
        crate::services::roster::resolve_team(state, &collab.sheets, sheet_id, user_id).await;
    }
}

async fn resolve_score_source(
    state: &SharedState,
    collab: &Collaborators,
    config: &StageConfig,
    user_id: Option<&str>,
) {
    if let (Some(sheet_id), Some(user_id)) = (config.score_sheet_id.as_deref(), user_id) {
        crate::services::roster::resolve_score(state, &collab.sheets, sheet_id, user_id).await;
    }
}

/// Fetch the next question from the active stage's shared pool (the `start`
/// command on grab stages, and "next question" in the pull flow).
pub async fn fetch_next_question(
    state: &SharedState,
    collab: &Collaborators,
) -> Result<(), ServiceError> {
    let stage_id = {
        let guard = state.stage().read().await;
        let Some(context) = guard.as_ref() else {
            return Err(ServiceError::InvalidState("no stage activated".into()));
        };
        context.config.stage_id.clone()
    };

    let grabbed = collab.bank.grab_next(&stage_id).await?;
    let mut guard = state.runtime().write().await;
    let Some(runtime) = guard.as_mut() else {
        return Err(ServiceError::InvalidState("no mode selected".into()));
    };
    match grabbed {
        Some(grab) => {
            runtime.open_pulled(grab.question, Some(grab.remaining));
            let snapshot = runtime.snapshot();
            drop(guard);
            state
                .hub()
                .broadcast(StationEvent::RuntimeChanged { snapshot });
        }
        None => {
            drop(guard);
            info!(stage_id, "question pool exhausted");
            state
                .hub()
                .notice(NoticeLevel::Info, "no questions left in the pool");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn retries_three_times_with_doubling_delays() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stamps: Arc<std::sync::Mutex<Vec<Duration>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let started = Instant::now();

        let counting = Arc::clone(&calls);
        let recording = Arc::clone(&stamps);
        let outcome: Result<(), String> = with_retry("test-load", move || {
            let counting = Arc::clone(&counting);
            let recording = Arc::clone(&recording);
            async move {
                recording.lock().unwrap().push(started.elapsed());
                counting.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            }
        })
        .await;

        assert_eq!(outcome.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let offsets = stamps.lock().unwrap().clone();
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_millis(1_000));
        assert_eq!(offsets[2], Duration::from_millis(3_000));
        assert_eq!(offsets[3], Duration::from_millis(7_000));
    }

    #[tokio::test(start_paused = true)]
    async fn early_success_halts_the_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Arc::clone(&calls);
        let started = Instant::now();

        let outcome: Result<u32, String> = with_retry("test-load", move || {
            let counting = Arc::clone(&counting);
            async move {
                if counting.fetch_add(1, Ordering::SeqCst) == 1 {
                    Ok(7)
                } else {
                    Err("boom".to_string())
                }
            }
        })
        .await;

        assert_eq!(outcome.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Only the first backoff delay was awaited.
        assert_eq!(started.elapsed(), Duration::from_millis(1_000));
    }
}
