//! Per-mode quiz runtime: question flow, health, timers and the buzzer
//! phases. One runtime exists per selected mode; switching modes replaces it
//! wholesale, which also cancels its timer task.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::dto::question::Question;
use crate::dto::submission::{AnswerRecord, AnswerValue, SubmitRequest};
use crate::state::evaluate::{self, Verdict};
use crate::state::history::AnswerLog;
use crate::state::machine::{BuzzerError, BuzzerEvent, BuzzerMachine, BuzzerPhase, DelegationTarget};
use crate::state::mode::{AnswerFlow, ContestMode, QuestionFlow};
use crate::state::timer::{Countdown, ScheduledTask};

/// Errors raised by runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Answering is currently disabled; the call was a no-op.
    #[error("answering is disabled")]
    AnsweringDisabled,
    /// Blank submissions are rejected before evaluation.
    #[error("blank answers are not accepted for this question")]
    EmptyAnswer,
    /// A submission is already outstanding; duplicates are no-ops.
    #[error("a submission is already outstanding")]
    SubmissionInFlight,
    /// The requested question index does not exist in the loaded set.
    #[error("question index {index} is out of range (total {total})")]
    QuestionIndexOutOfRange {
        /// Requested zero-based index.
        index: usize,
        /// Size of the loaded set.
        total: usize,
    },
    /// The mode has no buzzer.
    #[error("this mode has no buzzer")]
    NoBuzzer,
    /// Invalid buzzer transition.
    #[error(transparent)]
    Buzzer(#[from] BuzzerError),
}

/// What a successful submission produced.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Key of the answered question.
    pub question_key: String,
    /// Local best-effort verdict.
    pub verdict: Verdict,
    /// The record appended to the answer log.
    pub record: AnswerRecord,
}

/// Serializable view of the runtime consumed by the rendering surface.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    /// Active mode id.
    pub mode: &'static str,
    /// Currently open question, if any.
    pub question: Option<Question>,
    /// Zero-based question pointer, `-1` when no question was pushed yet.
    pub question_index: i64,
    /// Size of the loaded question set (0 when unknown).
    pub total_questions: usize,
    /// Remaining health points.
    pub hp: u32,
    /// Remaining countdown milliseconds, when the mode is timed.
    pub time_remaining_ms: Option<u64>,
    /// Elapsed countdown milliseconds, when the mode is timed.
    pub time_elapsed_ms: Option<u64>,
    /// Derived answering gate.
    pub answering_enabled: bool,
    /// Whether the runtime waits for the host after a submission.
    pub awaiting_host: bool,
    /// Station id the current question was delegated to, if any.
    pub delegation_target: Option<String>,
    /// Buzzer phase, hybrid-buzzer mode only.
    pub phase: Option<BuzzerPhase>,
    /// Questions left in the shared pool, grab/pull flows only.
    pub pool_remaining: Option<u64>,
}

/// Runtime state for one contest mode.
pub struct QuizRuntime {
    mode: &'static ContestMode,
    queue: Vec<Question>,
    question: Option<Question>,
    question_index: i64,
    pulled_count: usize,
    hp: u32,
    countdown: Option<Countdown>,
    ticker: Option<ScheduledTask>,
    awaiting_host: bool,
    answered_current: bool,
    buzzer: Option<BuzzerMachine>,
    delegation_target: Option<String>,
    submission_in_flight: bool,
    answers: AnswerLog,
    question_opened_at: Option<Instant>,
    pool_remaining: Option<u64>,
}

impl QuizRuntime {
    /// Fresh runtime for a mode. The question pointer starts at `-1` for
    /// push flows and `0` for local and pull flows.
    pub fn new(mode: &'static ContestMode) -> Self {
        let question_index = match mode.question_flow {
            QuestionFlow::Push => -1,
            QuestionFlow::Pull | QuestionFlow::Local => 0,
        };
        Self {
            mode,
            queue: Vec::new(),
            question: None,
            question_index,
            pulled_count: 0,
            hp: mode.features.initial_hp,
            countdown: None,
            ticker: None,
            awaiting_host: false,
            answered_current: false,
            buzzer: mode.features.requires_buzzer.then(BuzzerMachine::new),
            delegation_target: None,
            submission_in_flight: false,
            answers: AnswerLog::new(),
            question_opened_at: None,
            pool_remaining: None,
        }
    }

    /// The mode this runtime was built for.
    pub fn mode(&self) -> &'static ContestMode {
        self.mode
    }

    /// Remaining health points.
    pub fn hp(&self) -> u32 {
        self.hp
    }

    /// Current question pointer.
    pub fn question_index(&self) -> i64 {
        self.question_index
    }

    /// Recorded answers so far.
    pub fn answers(&self) -> &AnswerLog {
        &self.answers
    }

    /// Buzzer phase, hybrid-buzzer mode only.
    pub fn buzzer_phase(&self) -> Option<BuzzerPhase> {
        self.buzzer.as_ref().map(BuzzerMachine::phase)
    }

    /// Attach the timer tick task; the previous one, if any, is cancelled by
    /// being dropped.
    pub fn set_ticker(&mut self, task: ScheduledTask) {
        self.ticker = Some(task);
    }

    /// Derived answering gate. Never stored: recomputed from the question,
    /// the host gate, health, the countdown and the buzzer phase.
    pub fn answering_enabled(&self) -> bool {
        if self.question.is_none() || self.awaiting_host || self.answered_current {
            return false;
        }
        if self.mode.features.has_hp && self.hp == 0 {
            return false;
        }
        if self.countdown.as_ref().is_some_and(Countdown::expired) {
            return false;
        }
        match &self.buzzer {
            Some(machine) => machine.phase() == BuzzerPhase::Answer,
            None => true,
        }
    }

    /// True while a grab stage has been activated but no question fetched.
    pub fn waiting_for_start(&self) -> bool {
        self.question.is_none() && self.answers.is_empty()
    }

    /// Load the prefetched question set. Local flows open the first question
    /// immediately; push flows keep the pointer at `-1` until a jump command
    /// arrives.
    pub fn load_batch(&mut self, questions: Vec<Question>) {
        self.queue = questions;
        if self.mode.question_flow == QuestionFlow::Local && !self.queue.is_empty() {
            self.open_indexed(0);
        }
    }

    /// Jump the local question pointer, opening the question at that index.
    pub fn jump_to(&mut self, index: usize) -> Result<(), RuntimeError> {
        if index >= self.queue.len() {
            return Err(RuntimeError::QuestionIndexOutOfRange {
                index,
                total: self.queue.len(),
            });
        }
        self.open_indexed(index);
        Ok(())
    }

    /// Open an externally fetched question (grab and pull flows), together
    /// with the remaining pool size when the collaborator reports one.
    pub fn open_pulled(&mut self, question: Question, remaining: Option<u64>) {
        self.question_index = self.pulled_count as i64;
        self.pulled_count += 1;
        self.pool_remaining = remaining;
        self.open_question(question);
    }

    fn open_indexed(&mut self, index: usize) {
        self.question_index = index as i64;
        let question = self.queue[index].clone();
        self.open_question(question);
    }

    fn open_question(&mut self, question: Question) {
        self.question = Some(question);
        self.awaiting_host = false;
        self.answered_current = false;
        self.delegation_target = None;
        self.question_opened_at = Some(Instant::now());
        if let Some(machine) = &mut self.buzzer {
            // QuestionPosted is accepted from every phase.
            let _ = machine.apply(BuzzerEvent::QuestionPosted);
        }
        if self.countdown.is_none() {
            if let Some(total) = self.mode.features.timer {
                self.countdown = Some(Countdown::start(total));
            }
        }
    }

    /// Submit an answer for the open question.
    ///
    /// Rejections leave the runtime untouched: a disabled gate, a duplicate
    /// in-flight submission and a blank value (unless allowed) are all
    /// checked before anything is recorded or evaluated.
    pub fn submit(&mut self, request: SubmitRequest) -> Result<SubmitOutcome, RuntimeError> {
        if !self.answering_enabled() {
            return Err(RuntimeError::AnsweringDisabled);
        }
        if self.submission_in_flight {
            return Err(RuntimeError::SubmissionInFlight);
        }
        if request.value.is_blank() && !request.allow_empty {
            return Err(RuntimeError::EmptyAnswer);
        }

        let Some(question) = self.question.as_ref() else {
            return Err(RuntimeError::AnsweringDisabled);
        };
        let question_key = question.key().to_string();
        let verdict = evaluate::evaluate(question, &request.value);

        let record = self.record_answer(&question_key, request.value, request.meta);
        self.apply_submit_effects(verdict);
        self.submission_in_flight = true;

        Ok(SubmitOutcome {
            question_key,
            verdict,
            record,
        })
    }

    fn record_answer(
        &mut self,
        question_key: &str,
        value: AnswerValue,
        meta: Option<Value>,
    ) -> AnswerRecord {
        let duration_ms = self
            .question_opened_at
            .map(|opened| opened.elapsed().as_millis() as u64)
            .unwrap_or_default();
        let record = AnswerRecord {
            value,
            submitted_at: OffsetDateTime::now_utc(),
            duration_ms,
            meta,
        };
        self.answers.record(question_key, record.clone());
        record
    }

    fn apply_submit_effects(&mut self, verdict: Verdict) {
        match self.mode.answer_flow {
            AnswerFlow::Judged => {
                self.awaiting_host = true;
                if verdict.is_wrong() {
                    self.lose_hp();
                }
            }
            AnswerFlow::Buzzer => {
                self.awaiting_host = true;
                if let Some(machine) = &mut self.buzzer {
                    let _ = machine.apply(BuzzerEvent::Submitted);
                }
            }
            AnswerFlow::Immediate => match self.mode.question_flow {
                QuestionFlow::Local => self.advance_local(),
                QuestionFlow::Pull | QuestionFlow::Push => {
                    if verdict.is_wrong() {
                        self.lose_hp();
                    }
                    self.answered_current = true;
                }
            },
        }
    }

    /// Advance the local pointer after an immediate-flow submission. Past the
    /// last question the runtime keeps the exhausted state and answering
    /// stays disabled.
    fn advance_local(&mut self) {
        let next = self.question_index + 1;
        if (next as usize) < self.queue.len() {
            self.open_indexed(next as usize);
        } else {
            self.question = None;
            self.question_opened_at = None;
        }
    }

    /// Mark the outstanding remote sync as settled, allowing the next
    /// submission.
    pub fn clear_in_flight(&mut self) {
        self.submission_in_flight = false;
    }

    /// Apply an explicit host judgement for the latest answer. Only a
    /// "wrong" judgement carries an effect: health loss in HP modes.
    pub fn host_judged_wrong(&mut self) {
        self.lose_hp();
    }

    fn lose_hp(&mut self) {
        if self.mode.features.has_hp {
            self.hp = self.hp.saturating_sub(self.mode.features.hp_loss_per_wrong);
        }
    }

    /// Arm the buzzer for the current question (host control signal).
    pub fn arm_buzzer(&mut self) -> Result<(), RuntimeError> {
        let machine = self.buzzer.as_mut().ok_or(RuntimeError::NoBuzzer)?;
        machine.apply(BuzzerEvent::SignalArmed)?;
        Ok(())
    }

    /// Hit the buzzer. Fails before the start-buzzing signal has arrived for
    /// the current question.
    pub fn trigger_buzzer(&mut self) -> Result<BuzzerPhase, RuntimeError> {
        let machine = self.buzzer.as_mut().ok_or(RuntimeError::NoBuzzer)?;
        Ok(machine.apply(BuzzerEvent::Trigger)?)
    }

    /// Delegate the contested question after winning the buzz.
    pub fn delegate(
        &mut self,
        target_station: impl Into<String>,
        target: DelegationTarget,
    ) -> Result<BuzzerPhase, RuntimeError> {
        let machine = self.buzzer.as_mut().ok_or(RuntimeError::NoBuzzer)?;
        let phase = machine.apply(BuzzerEvent::Delegate(target))?;
        self.delegation_target = Some(target_station.into());
        Ok(phase)
    }

    /// Restore the runtime to its initial state, keeping the loaded question
    /// set. Health, answers, the countdown and the buzzer all start over.
    pub fn reset(&mut self) {
        // Stop the tick task first; the caller attaches a fresh one when the
        // mode is timed.
        drop(self.ticker.take());
        let queue = std::mem::take(&mut self.queue);
        let mut fresh = Self::new(self.mode);
        fresh.queue = queue;
        *self = fresh;
    }

    /// Current view for the rendering surface.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            mode: self.mode.id,
            question: self.question.clone(),
            question_index: self.question_index,
            total_questions: self.queue.len(),
            hp: self.hp,
            time_remaining_ms: self
                .countdown
                .as_ref()
                .map(|countdown| countdown.remaining().as_millis() as u64),
            time_elapsed_ms: self
                .countdown
                .as_ref()
                .map(|countdown| countdown.elapsed().as_millis() as u64),
            answering_enabled: self.answering_enabled(),
            awaiting_host: self.awaiting_host,
            delegation_target: self.delegation_target.clone(),
            phase: self.buzzer_phase(),
            pool_remaining: self.pool_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::question::{AnswerKey, QuestionKind, StandardQuestion};
    use crate::state::mode;
    use std::time::Duration;

    fn question(id: &str, correct: &str) -> Question {
        Question::Standard(StandardQuestion {
            id: id.into(),
            title: format!("prompt {id}"),
            kind: QuestionKind::Single,
            options: vec!["A".into(), "B".into()],
            correct: Some(AnswerKey::One(correct.into())),
        })
    }

    fn submit_value(runtime: &mut QuizRuntime, value: &str) -> Result<SubmitOutcome, RuntimeError> {
        runtime.submit(SubmitRequest {
            value: AnswerValue::Text(value.into()),
            allow_empty: false,
            meta: None,
        })
    }

    fn mode_by_id(id: &str) -> &'static ContestMode {
        mode::find(id).expect("known mode")
    }

    #[tokio::test]
    async fn submit_while_disabled_is_a_no_op() {
        let mut runtime = QuizRuntime::new(mode_by_id("qa"));
        assert!(!runtime.answering_enabled());

        let err = submit_value(&mut runtime, "B").unwrap_err();
        assert!(matches!(err, RuntimeError::AnsweringDisabled));
        assert!(runtime.answers().is_empty());
        assert_eq!(runtime.question_index(), -1);
    }

    #[tokio::test]
    async fn blank_submission_is_rejected_before_evaluation() {
        let mut runtime = QuizRuntime::new(mode_by_id("qa"));
        runtime.load_batch(vec![question("q1", "B")]);
        runtime.jump_to(0).unwrap();

        let err = submit_value(&mut runtime, "   ").unwrap_err();
        assert!(matches!(err, RuntimeError::EmptyAnswer));
        assert!(runtime.answers().is_empty());
        assert!(runtime.answering_enabled());
    }

    #[tokio::test]
    async fn judged_flow_waits_for_host_after_submit() {
        let mut runtime = QuizRuntime::new(mode_by_id("qa"));
        runtime.load_batch(vec![question("q1", "B"), question("q2", "A")]);
        runtime.jump_to(0).unwrap();

        let outcome = submit_value(&mut runtime, "B").unwrap();
        assert_eq!(outcome.verdict, Verdict::Correct);
        assert!(!runtime.answering_enabled());

        // The next pushed question reopens answering.
        runtime.clear_in_flight();
        runtime.jump_to(1).unwrap();
        assert!(runtime.answering_enabled());
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected_while_in_flight() {
        let mut runtime = QuizRuntime::new(mode_by_id("speed-run"));
        runtime.load_batch(vec![question("q1", "B"), question("q2", "A")]);

        submit_value(&mut runtime, "B").unwrap();
        let err = submit_value(&mut runtime, "A").unwrap_err();
        assert!(matches!(err, RuntimeError::SubmissionInFlight));

        runtime.clear_in_flight();
        assert!(submit_value(&mut runtime, "A").is_ok());
    }

    #[tokio::test]
    async fn hp_exhaustion_disables_answering_until_reset() {
        let mut runtime = QuizRuntime::new(mode_by_id("last-stand"));
        runtime.load_batch(vec![
            question("q1", "B"),
            question("q2", "B"),
            question("q3", "B"),
            question("q4", "B"),
        ]);
        // Initial HP is taken from the mode; force the documented scenario.
        assert_eq!(runtime.hp(), 3);

        for index in 0..3 {
            runtime.jump_to(index).unwrap();
            let outcome = submit_value(&mut runtime, "A").unwrap();
            assert_eq!(outcome.verdict, Verdict::Incorrect);
            runtime.clear_in_flight();
        }

        assert_eq!(runtime.hp(), 0);
        assert!(!runtime.answering_enabled());

        // A further pushed question does not reopen answering.
        runtime.jump_to(3).unwrap();
        assert!(!runtime.answering_enabled());

        runtime.reset();
        assert_eq!(runtime.hp(), 3);
        runtime.jump_to(0).unwrap();
        assert!(runtime.answering_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_disables_answering_with_questions_left() {
        let mut runtime = QuizRuntime::new(mode_by_id("speed-run"));
        runtime.load_batch(vec![question("q1", "B"), question("q2", "A")]);
        assert!(runtime.answering_enabled());

        tokio::time::advance(Duration::from_millis(300_250)).await;
        let snapshot = runtime.snapshot();
        assert_eq!(snapshot.time_remaining_ms, Some(0));
        assert!(!snapshot.answering_enabled);
        assert!(snapshot.question.is_some());
    }

    #[tokio::test]
    async fn local_flow_advances_and_exhausts() {
        let mut runtime = QuizRuntime::new(mode_by_id("speed-run"));
        runtime.load_batch(vec![question("q1", "B"), question("q2", "A")]);

        submit_value(&mut runtime, "B").unwrap();
        runtime.clear_in_flight();
        assert_eq!(runtime.question_index(), 1);
        assert!(runtime.answering_enabled());

        submit_value(&mut runtime, "A").unwrap();
        runtime.clear_in_flight();
        assert!(!runtime.answering_enabled());
        assert_eq!(runtime.answers().len(), 2);
    }

    #[tokio::test]
    async fn pull_flow_loses_hp_and_waits_for_next_fetch() {
        let mut runtime = QuizRuntime::new(mode_by_id("ocean-adventure"));
        assert_eq!(runtime.hp(), 2);

        runtime.open_pulled(question("o1", "B"), Some(9));
        assert_eq!(runtime.question_index(), 0);

        submit_value(&mut runtime, "A").unwrap();
        runtime.clear_in_flight();
        assert_eq!(runtime.hp(), 1);
        assert!(!runtime.answering_enabled());

        runtime.open_pulled(question("o2", "B"), Some(8));
        assert_eq!(runtime.question_index(), 1);
        assert!(runtime.answering_enabled());

        submit_value(&mut runtime, "A").unwrap();
        runtime.clear_in_flight();
        assert_eq!(runtime.hp(), 0);

        runtime.open_pulled(question("o3", "B"), Some(7));
        assert!(!runtime.answering_enabled());
    }

    #[tokio::test]
    async fn buzzer_mode_gates_submission_on_phase() {
        let mut runtime = QuizRuntime::new(mode_by_id("ultimate-challenge"));
        runtime.load_batch(vec![question("q1", "B"), question("q2", "B")]);
        runtime.jump_to(0).unwrap();

        // Open question, but the phase is buzz: answering stays closed.
        assert!(!runtime.answering_enabled());
        assert!(matches!(
            runtime.trigger_buzzer(),
            Err(RuntimeError::Buzzer(BuzzerError::TriggerBeforeSignal))
        ));

        runtime.arm_buzzer().unwrap();
        assert_eq!(runtime.trigger_buzzer().unwrap(), BuzzerPhase::Decision);
        runtime.delegate("station-self", DelegationTarget::Own).unwrap();
        assert!(runtime.answering_enabled());

        submit_value(&mut runtime, "B").unwrap();
        runtime.clear_in_flight();
        assert_eq!(runtime.buzzer_phase(), Some(BuzzerPhase::Waiting));
        assert!(!runtime.answering_enabled());
    }

    #[tokio::test]
    async fn opponent_delegation_locks_the_question() {
        let mut runtime = QuizRuntime::new(mode_by_id("ultimate-challenge"));
        runtime.load_batch(vec![question("q1", "B"), question("q2", "B")]);
        runtime.jump_to(0).unwrap();
        runtime.arm_buzzer().unwrap();
        runtime.trigger_buzzer().unwrap();
        runtime
            .delegate("station-rival", DelegationTarget::Opponent)
            .unwrap();

        assert_eq!(runtime.buzzer_phase(), Some(BuzzerPhase::Locked));
        assert!(!runtime.answering_enabled());
        assert!(submit_value(&mut runtime, "B").is_err());

        // Next question plus a fresh signal reopen the race.
        runtime.jump_to(1).unwrap();
        assert_eq!(runtime.buzzer_phase(), Some(BuzzerPhase::Buzz));
        assert!(matches!(
            runtime.trigger_buzzer(),
            Err(RuntimeError::Buzzer(BuzzerError::TriggerBeforeSignal))
        ));
        runtime.arm_buzzer().unwrap();
        assert_eq!(runtime.trigger_buzzer().unwrap(), BuzzerPhase::Decision);
    }
}
