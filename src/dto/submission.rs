//! Contestant answer payloads and the records kept for them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{TimestampMilliSeconds, serde_as};
use time::OffsetDateTime;

/// Value submitted for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    /// Scalar answer (single choice, boolean, fill-in text or upload token).
    Text(String),
    /// Array answer (multi-select, wordbank blanks, ocean option ids).
    Many(Vec<String>),
}

impl AnswerValue {
    /// True when the value carries no usable content.
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(text) => text.trim().is_empty(),
            AnswerValue::Many(values) => {
                values.is_empty() || values.iter().all(|value| value.trim().is_empty())
            }
        }
    }
}

/// Submission request handed in by the answering surface.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    /// The answer value.
    pub value: AnswerValue,
    /// Whether a blank value is acceptable for this question.
    #[serde(default)]
    pub allow_empty: bool,
    /// Free-form metadata carried into the answer record.
    #[serde(default)]
    pub meta: Option<Value>,
}

/// One recorded answer. Appended on submission and only ever replaced by a
/// fresh submission for the same question.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Submitted value.
    pub value: AnswerValue,
    /// Wall-clock submission instant.
    #[serde_as(as = "TimestampMilliSeconds")]
    pub submitted_at: OffsetDateTime,
    /// Time spent on the question, in milliseconds.
    pub duration_ms: u64,
    /// Free-form metadata from the submitting surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}
