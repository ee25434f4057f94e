use thiserror::Error;

/// Sub-state governing who may answer a contested question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuzzerPhase {
    /// No open question.
    Waiting,
    /// A question is open; stations may race to buzz once armed.
    Buzz,
    /// This station won the buzz and must pick who answers.
    Decision,
    /// The opponent answers; this station sits out the question.
    Locked,
    /// This station answers; exactly one submission is allowed.
    Answer,
}

/// Where a buzz winner sends the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationTarget {
    /// Keep the question.
    Own,
    /// Hand the question to the opponent.
    Opponent,
}

/// Events that can be applied to the buzzer machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzerEvent {
    /// A new question became available.
    QuestionPosted,
    /// The host opened buzzing for the current question.
    SignalArmed,
    /// The contestant hit the buzzer.
    Trigger,
    /// The buzz winner delegated the answer.
    Delegate(DelegationTarget),
    /// The answer was submitted.
    Submitted,
}

/// Error returned when an event cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuzzerError {
    /// The buzzer was triggered before the host opened buzzing.
    #[error("buzzer triggered before the start-buzzing signal for this question")]
    TriggerBeforeSignal,
    /// The event is not valid from the current phase.
    #[error("invalid buzzer transition: {event:?} cannot be applied while in {from:?}")]
    InvalidTransition {
        /// Phase the machine was in.
        from: BuzzerPhase,
        /// Offending event.
        event: BuzzerEvent,
    },
}

/// Phase machine for one station in the hybrid-buzzer mode.
///
/// A question arrival always resets the machine to [`BuzzerPhase::Buzz`] with
/// the signal disarmed; triggering stays rejected until a fresh
/// start-buzzing signal arrives for that question.
#[derive(Debug, Clone)]
pub struct BuzzerMachine {
    phase: BuzzerPhase,
    armed: bool,
}

impl Default for BuzzerMachine {
    fn default() -> Self {
        Self {
            phase: BuzzerPhase::Waiting,
            armed: false,
        }
    }
}

impl BuzzerMachine {
    /// Fresh machine in the waiting phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> BuzzerPhase {
        self.phase
    }

    /// Whether the start-buzzing signal for the current question has arrived.
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Apply an event, returning the next phase.
    pub fn apply(&mut self, event: BuzzerEvent) -> Result<BuzzerPhase, BuzzerError> {
        let next = match (self.phase, event) {
            // A new question supersedes whatever the previous one left behind,
            // locked stations included, and always disarms the signal.
            (_, BuzzerEvent::QuestionPosted) => {
                self.armed = false;
                BuzzerPhase::Buzz
            }
            (BuzzerPhase::Buzz, BuzzerEvent::SignalArmed) => {
                self.armed = true;
                BuzzerPhase::Buzz
            }
            // Signals outside the buzz phase carry no meaning for this
            // question; they are dropped rather than rejected.
            (phase, BuzzerEvent::SignalArmed) => phase,
            (BuzzerPhase::Buzz, BuzzerEvent::Trigger) => {
                if !self.armed {
                    return Err(BuzzerError::TriggerBeforeSignal);
                }
                BuzzerPhase::Decision
            }
            (BuzzerPhase::Decision, BuzzerEvent::Delegate(DelegationTarget::Own)) => {
                BuzzerPhase::Answer
            }
            (BuzzerPhase::Decision, BuzzerEvent::Delegate(DelegationTarget::Opponent)) => {
                BuzzerPhase::Locked
            }
            (BuzzerPhase::Answer, BuzzerEvent::Submitted) => {
                self.armed = false;
                BuzzerPhase::Waiting
            }
            (from, event) => return Err(BuzzerError::InvalidTransition { from, event }),
        };

        self.phase = next;
        Ok(next)
    }
}
