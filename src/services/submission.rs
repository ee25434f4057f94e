//! Answer submission: optimistic local state first, best-effort remote sync
//! second. The local outcome is never rolled back when the sync fails.

use tracing::{info, warn};

use crate::dao::Collaborators;
use crate::dao::local::LocalStore;
use crate::dao::sheets::JudgedResult;
use crate::dto::submission::{AnswerValue, SubmitRequest};
use crate::error::ServiceError;
use crate::state::SharedState;
use crate::state::evaluate::Verdict;
use crate::state::events::{NoticeLevel, StationEvent};
use crate::state::runtime::SubmitOutcome;

use super::stage;

/// Submit an answer for the open question. Evaluation, the answer record,
/// HP and phase effects all apply locally before any network round trip;
/// the judged result is synced to the scoring sheet in the background.
pub async fn submit_answer(
    state: &SharedState,
    collab: &Collaborators,
    store: Option<&LocalStore>,
    request: SubmitRequest,
) -> Result<Verdict, ServiceError> {
    let (outcome, snapshot) = {
        let mut guard = state.runtime().write().await;
        let Some(runtime) = guard.as_mut() else {
            return Err(ServiceError::InvalidState("no mode selected".into()));
        };
        let outcome = runtime.submit(request)?;
        (outcome, runtime.snapshot())
    };

    info!(
        question_key = %outcome.question_key,
        verdict = ?outcome.verdict,
        submitted_at = %crate::dto::format_timestamp(outcome.record.submitted_at),
        "answer submitted"
    );
    state.hub().broadcast(StationEvent::VerdictReady {
        question_key: outcome.question_key.clone(),
        verdict: outcome.verdict,
    });
    state
        .hub()
        .broadcast(StationEvent::RuntimeChanged { snapshot });
    if outcome.verdict == Verdict::Unknown {
        // Correctness could not be decided locally; the host settles it.
        state
            .hub()
            .notice(NoticeLevel::Info, "answer recorded, awaiting host judgement");
    }

    if let Some(store) = store {
        store.record_answer(&outcome.question_key, outcome.record.clone());
    }

    spawn_remote_sync(state.clone(), collab.clone(), outcome.clone());
    Ok(outcome.verdict)
}

/// Upload a rendered drawing and submit the returned token as a fill-in
/// answer value.
pub async fn submit_drawing(
    state: &SharedState,
    collab: &Collaborators,
    store: Option<&LocalStore>,
    image: Vec<u8>,
) -> Result<Verdict, ServiceError> {
    let token = collab.uploads.upload_image(image).await?;
    submit_answer(
        state,
        collab,
        store,
        SubmitRequest {
            value: AnswerValue::Text(token),
            allow_empty: false,
            meta: None,
        },
    )
    .await
}

/// Hit the buzzer for the contested question. The runtime rejects triggers
/// that arrive before the host's start-buzzing signal.
pub async fn trigger_buzzer(state: &SharedState) -> Result<(), ServiceError> {
    let snapshot = {
        let mut guard = state.runtime().write().await;
        let Some(runtime) = guard.as_mut() else {
            return Err(ServiceError::InvalidState("no mode selected".into()));
        };
        runtime.trigger_buzzer()?;
        runtime.snapshot()
    };
    state
        .hub()
        .broadcast(StationEvent::RuntimeChanged { snapshot });
    Ok(())
}

/// Delegate the contested question after winning the buzz: answering it
/// locally or locking this station out in favor of the opponent.
pub async fn delegate_answer(
    state: &SharedState,
    target_station: &str,
    keep: bool,
) -> Result<(), ServiceError> {
    use crate::state::machine::DelegationTarget;

    let target = if keep {
        DelegationTarget::Own
    } else {
        DelegationTarget::Opponent
    };
    let snapshot = {
        let mut guard = state.runtime().write().await;
        let Some(runtime) = guard.as_mut() else {
            return Err(ServiceError::InvalidState("no mode selected".into()));
        };
        runtime.delegate(target_station, target)?;
        runtime.snapshot()
    };
    state
        .hub()
        .broadcast(StationEvent::RuntimeChanged { snapshot });
    Ok(())
}

/// Apply an explicit host "wrong" judgement to the latest answer.
pub async fn host_judged_wrong(state: &SharedState) -> Result<(), ServiceError> {
    let snapshot = {
        let mut guard = state.runtime().write().await;
        let Some(runtime) = guard.as_mut() else {
            return Err(ServiceError::InvalidState("no mode selected".into()));
        };
        runtime.host_judged_wrong();
        runtime.snapshot()
    };
    state
        .hub()
        .broadcast(StationEvent::RuntimeChanged { snapshot });
    Ok(())
}

/// Push the judged result to the scoring sheet with the shared retry policy,
/// then release the submission gate whatever happened.
fn spawn_remote_sync(state: SharedState, collab: Collaborators, outcome: SubmitOutcome) {
    tokio::spawn(async move {
        let target = {
            let stage = state.stage().read().await;
            let roster = state.roster().read().await;
            stage
                .as_ref()
                .and_then(|context| context.config.score_sheet_id.clone())
                .zip(roster.score_record_id.clone())
        };

        match target {
            Some((sheet_id, record_id)) => {
                let correct = match outcome.verdict {
                    Verdict::Correct => Some(true),
                    Verdict::Incorrect => Some(false),
                    Verdict::Unknown => None,
                };
                let submitted_at_ms = (outcome.record.submitted_at.unix_timestamp_nanos()
                    / 1_000_000) as u64;
                let result = JudgedResult {
                    question_key: &outcome.question_key,
                    value: &outcome.record.value,
                    correct,
                    duration_ms: outcome.record.duration_ms,
                    submitted_at_ms,
                };
                let sync = stage::with_retry("judged-result-sync", || {
                    collab.sheets.submit_judged_result(&sheet_id, &record_id, &result)
                })
                .await;
                if let Err(err) = sync {
                    // Local state stays as-is; only the bookkeeping lagged.
                    warn!(question_key = %outcome.question_key, error = %err, "judged-result sync failed");
                    state
                        .hub()
                        .notice(NoticeLevel::Warning, "score sync failed; the host has the final say");
                }
            }
            None => {
                warn!(
                    question_key = %outcome.question_key,
                    "no scoring target resolved; skipping judged-result sync"
                );
            }
        }

        let mut guard = state.runtime().write().await;
        if let Some(runtime) = guard.as_mut() {
            runtime.clear_in_flight();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    fn collaborators() -> Collaborators {
        Collaborators::new("http://127.0.0.1:9").expect("client builds")
    }

    #[tokio::test]
    async fn submission_without_a_mode_is_rejected() {
        let state = AppState::new();
        let err = submit_answer(
            &state,
            &collaborators(),
            None,
            SubmitRequest {
                value: AnswerValue::Text("B".into()),
                allow_empty: false,
                meta: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn failed_sync_never_rolls_back_local_state() {
        let state = AppState::new();
        state
            .install_mode(crate::state::mode::find("speed-run").unwrap())
            .await;
        {
            let mut guard = state.runtime().write().await;
            guard.as_mut().unwrap().load_batch(vec![crate::dto::question::Question::Standard(
                crate::dto::question::StandardQuestion {
                    id: "q1".into(),
                    title: "prompt".into(),
                    kind: crate::dto::question::QuestionKind::Single,
                    options: vec!["A".into(), "B".into()],
                    correct: Some(crate::dto::question::AnswerKey::One("B".into())),
                },
            )]);
        }

        // The collaborator endpoint is unreachable; the sync will fail, but
        // the verdict and the recorded answer stay.
        let verdict = submit_answer(
            &state,
            &collaborators(),
            None,
            SubmitRequest {
                value: AnswerValue::Text("B".into()),
                allow_empty: false,
                meta: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(verdict, Verdict::Correct);

        let guard = state.runtime().read().await;
        assert_eq!(guard.as_ref().unwrap().answers().len(), 1);
    }
}
