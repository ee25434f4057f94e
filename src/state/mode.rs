//! Static descriptors for the five contest modes.

use std::time::Duration;

use serde::Serialize;

/// How questions reach the runtime in a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionFlow {
    /// The host pushes questions (by jump command) into a prefetched set.
    Push,
    /// Questions are fetched one at a time from a remote pool.
    Pull,
    /// The full set is fetched once and advanced locally.
    Local,
}

/// How answers leave the runtime in a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFlow {
    /// The host confirms every answer; the runtime waits after submitting.
    Judged,
    /// Submitting immediately advances without any host signal.
    Immediate,
    /// Answers are gated by the buzzer phase machine.
    Buzzer,
}

/// Feature switches of one mode.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModeFeatures {
    /// Whether the mode tracks health points.
    pub has_hp: bool,
    /// Starting health points.
    pub initial_hp: u32,
    /// Health lost per wrong answer.
    pub hp_loss_per_wrong: u32,
    /// Whether answering requires winning the buzzer.
    pub requires_buzzer: bool,
    /// Whether a buzz winner may delegate the answer.
    pub allows_delegation: bool,
    /// Global countdown length, when the mode is timed.
    pub timer: Option<Duration>,
    /// Whether submitting advances to the next question without a host signal.
    pub auto_advance: bool,
}

impl ModeFeatures {
    const fn plain() -> Self {
        Self {
            has_hp: false,
            initial_hp: 0,
            hp_loss_per_wrong: 0,
            requires_buzzer: false,
            allows_delegation: false,
            timer: None,
            auto_advance: false,
        }
    }
}

/// Immutable descriptor of a contest mode, selected by the operator.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ContestMode {
    /// Stable mode identifier.
    pub id: &'static str,
    /// Broker channel suffix carrying this mode's traffic.
    pub channel: &'static str,
    /// Question delivery style.
    pub question_flow: QuestionFlow,
    /// Answer delivery style.
    pub answer_flow: AnswerFlow,
    /// Feature switches.
    pub features: ModeFeatures,
}

/// All modes the station knows how to run.
pub const MODES: [ContestMode; 5] = [
    ContestMode {
        id: "qa",
        channel: "qa",
        question_flow: QuestionFlow::Push,
        answer_flow: AnswerFlow::Judged,
        features: ModeFeatures::plain(),
    },
    ContestMode {
        id: "last-stand",
        channel: "last-stand",
        question_flow: QuestionFlow::Push,
        answer_flow: AnswerFlow::Judged,
        features: ModeFeatures {
            has_hp: true,
            initial_hp: 3,
            hp_loss_per_wrong: 1,
            ..ModeFeatures::plain()
        },
    },
    ContestMode {
        id: "speed-run",
        channel: "speed-run",
        question_flow: QuestionFlow::Local,
        answer_flow: AnswerFlow::Immediate,
        features: ModeFeatures {
            timer: Some(Duration::from_secs(300)),
            auto_advance: true,
            ..ModeFeatures::plain()
        },
    },
    ContestMode {
        id: "ocean-adventure",
        channel: "ocean-adventure",
        question_flow: QuestionFlow::Pull,
        answer_flow: AnswerFlow::Immediate,
        features: ModeFeatures {
            has_hp: true,
            initial_hp: 2,
            hp_loss_per_wrong: 1,
            timer: Some(Duration::from_secs(720)),
            ..ModeFeatures::plain()
        },
    },
    ContestMode {
        id: "ultimate-challenge",
        channel: "ultimate-challenge",
        question_flow: QuestionFlow::Push,
        answer_flow: AnswerFlow::Buzzer,
        features: ModeFeatures {
            requires_buzzer: true,
            allows_delegation: true,
            ..ModeFeatures::plain()
        },
    },
];

/// Look up a mode by its identifier.
pub fn find(id: &str) -> Option<&'static ContestMode> {
    MODES.iter().find(|mode| mode.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id() {
        assert_eq!(find("speed-run").map(|m| m.id), Some("speed-run"));
        assert!(find("karaoke").is_none());
    }

    #[test]
    fn hp_modes_carry_positive_initial_hp() {
        for mode in MODES.iter().filter(|mode| mode.features.has_hp) {
            assert!(mode.features.initial_hp > 0, "mode {}", mode.id);
            assert!(mode.features.hp_loss_per_wrong > 0, "mode {}", mode.id);
        }
    }
}
