//! Local best-effort answer evaluation. The host remains authoritative.

use std::collections::HashSet;

use serde::Serialize;

use crate::dto::question::{AnswerKey, Question, QuestionKind};
use crate::dto::submission::AnswerValue;

/// Outcome of evaluating a submission locally.
///
/// `Unknown` means the question carries no configured correct answer; it is
/// deliberately distinct from `Incorrect` and never costs health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Submission matches the configured answer.
    Correct,
    /// Submission does not match the configured answer.
    Incorrect,
    /// No configured answer; correctness cannot be decided locally.
    Unknown,
}

impl Verdict {
    /// True only for a decided wrong answer.
    pub fn is_wrong(self) -> bool {
        self == Verdict::Incorrect
    }
}

/// Evaluate a submitted value against a question.
pub fn evaluate(question: &Question, value: &AnswerValue) -> Verdict {
    match question {
        Question::Standard(standard) => {
            let Some(expected) = &standard.correct else {
                return Verdict::Unknown;
            };
            match (expected, value) {
                (AnswerKey::One(expected), AnswerValue::Text(submitted)) => {
                    decided(submitted == expected)
                }
                (AnswerKey::Many(expected), AnswerValue::Many(submitted)) => {
                    if standard.kind == QuestionKind::WordBank {
                        decided(positional_eq(submitted, expected))
                    } else {
                        decided(set_eq(submitted, expected))
                    }
                }
                // Shape mismatch between submission and key.
                _ => Verdict::Incorrect,
            }
        }
        Question::Ocean(ocean) => {
            if ocean.correct_ids.is_empty() {
                return Verdict::Unknown;
            }
            match value {
                AnswerValue::Many(submitted) => decided(set_eq(submitted, &ocean.correct_ids)),
                AnswerValue::Text(_) => Verdict::Incorrect,
            }
        }
    }
}

fn decided(correct: bool) -> Verdict {
    if correct { Verdict::Correct } else { Verdict::Incorrect }
}

/// Unordered equality: same size, same membership.
fn set_eq(submitted: &[String], expected: &[String]) -> bool {
    if submitted.len() != expected.len() {
        return false;
    }
    let expected: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let submitted: HashSet<&str> = submitted.iter().map(String::as_str).collect();
    submitted == expected
}

/// Index-by-index equality across all blanks.
fn positional_eq(submitted: &[String], expected: &[String]) -> bool {
    submitted.len() == expected.len()
        && submitted.iter().zip(expected).all(|(got, want)| got == want)
}
