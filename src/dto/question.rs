//! Question shapes delivered by the question-bank collaborators.
//!
//! The wire carries two distinct row shapes (standard rows and custom "ocean"
//! rows). They are discriminated exactly once, at the decode boundary, and
//! carried through the rest of the client as an explicit tagged union.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use validator::Validate;

/// Question category of a standard row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    /// Exactly one option is correct.
    Single,
    /// A known set of options is correct.
    Multiple,
    /// Multiple-select with an undisclosed number of correct options.
    Indeterminate,
    /// True/false.
    Boolean,
    /// Free-text fill-in, compared as a scalar.
    Fill,
    /// Positional fill-in: every blank is compared against its own slot.
    #[serde(rename = "wordbank")]
    WordBank,
}

/// Expected answer of a standard question, scalar or array valued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerKey {
    /// Single expected value.
    One(String),
    /// Array of expected values; ordering semantics depend on the kind.
    Many(Vec<String>),
}

/// A standard question row.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StandardQuestion {
    /// Stable question identifier within its sheet.
    #[validate(length(min = 1))]
    pub id: String,
    /// Prompt shown to the contestant.
    #[validate(length(min = 1))]
    pub title: String,
    /// Question category.
    pub kind: QuestionKind,
    /// Selectable options; empty for fill-in kinds.
    pub options: Vec<String>,
    /// Expected answer; `None` means correctness cannot be decided locally.
    pub correct: Option<AnswerKey>,
}

/// A custom "ocean" question drawn from a shared pool.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OceanQuestion {
    /// Pool-wide question key.
    #[validate(length(min = 1))]
    pub question_key: String,
    /// Prompt stem.
    #[validate(length(min = 1))]
    pub stem: String,
    /// Option identifiers mapped to their display text, in pool order.
    pub option_pool: IndexMap<String, String>,
    /// Identifiers of the correct options.
    pub correct_ids: Vec<String>,
}

/// Tagged union over the two question shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum Question {
    /// Standard sheet row.
    Standard(StandardQuestion),
    /// Custom pool row.
    Ocean(OceanQuestion),
}

impl Question {
    /// Identifier used to key answer records for this question.
    pub fn key(&self) -> &str {
        match self {
            Question::Standard(q) => &q.id,
            Question::Ocean(q) => &q.question_key,
        }
    }

    /// Run the field-level checks of the underlying row.
    pub fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            Question::Standard(q) => q.validate(),
            Question::Ocean(q) => q.validate(),
        }
    }
}

/// Raw row as fetched from the question-bank collaborators, before the shape
/// has been decided. Both shapes' fields are optional here.
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestionRow {
    /// Standard row identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Standard row title.
    #[serde(default)]
    pub title: Option<String>,
    /// Standard row kind, e.g. `"single"`.
    #[serde(default, rename = "type")]
    pub kind: Option<QuestionKind>,
    /// Standard row options.
    #[serde(default)]
    pub options: Vec<String>,
    /// Standard row expected answer, scalar or array.
    #[serde(default)]
    pub correct_answer: Option<Value>,
    /// Ocean row key.
    #[serde(default)]
    pub question_key: Option<String>,
    /// Ocean row stem.
    #[serde(default)]
    pub stem: Option<String>,
    /// Ocean row option pool.
    #[serde(default)]
    pub option_pool: IndexMap<String, String>,
    /// Ocean row correct option ids.
    #[serde(default)]
    pub correct_answer_ids: Vec<String>,
}

/// Failure to turn a raw row into a [`Question`].
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The row matches neither shape.
    #[error("row matches neither the standard nor the ocean question shape")]
    UnrecognizedShape,
    /// The expected-answer field holds something other than a string or an
    /// array of strings.
    #[error("unsupported correct-answer payload for question `{id}`")]
    UnsupportedAnswer {
        /// Identifier of the offending row.
        id: String,
    },
    /// Field-level validation of the normalized row failed.
    #[error("invalid question row: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl RawQuestionRow {
    /// Decide the shape of this row and normalize it. A row with a
    /// `question_key` is an ocean row; a row with both `id` and `title` is a
    /// standard row; anything else is unrecognized.
    pub fn normalize(self) -> Result<Question, NormalizeError> {
        if let Some(question_key) = self.question_key {
            let question = OceanQuestion {
                question_key,
                stem: self.stem.unwrap_or_default(),
                option_pool: self.option_pool,
                correct_ids: self.correct_answer_ids,
            };
            question.validate()?;
            return Ok(Question::Ocean(question));
        }

        let (Some(id), Some(title)) = (self.id, self.title) else {
            return Err(NormalizeError::UnrecognizedShape);
        };

        let correct = match self.correct_answer {
            None | Some(Value::Null) => None,
            Some(Value::String(one)) => Some(AnswerKey::One(one)),
            Some(Value::Array(values)) => {
                let many = values
                    .into_iter()
                    .map(|value| match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .collect();
                Some(AnswerKey::Many(many))
            }
            Some(_) => {
                return Err(NormalizeError::UnsupportedAnswer { id });
            }
        };

        let question = StandardQuestion {
            id,
            title,
            kind: self.kind.unwrap_or(QuestionKind::Single),
            options: self.options,
            correct,
        };
        question.validate()?;
        Ok(Question::Standard(question))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> RawQuestionRow {
        serde_json::from_value(value).expect("raw row decodes")
    }

    #[test]
    fn standard_shape_is_detected() {
        let row = decode(json!({
            "id": "std-1",
            "title": "Pick one",
            "type": "single",
            "options": ["A", "B"],
            "correct_answer": "B",
        }));

        match row.normalize().expect("normalizes") {
            Question::Standard(q) => {
                assert_eq!(q.kind, QuestionKind::Single);
                assert_eq!(q.correct, Some(AnswerKey::One("B".into())));
            }
            other => panic!("expected standard question, got {other:?}"),
        }
    }

    #[test]
    fn ocean_shape_wins_over_partial_standard_fields() {
        let row = decode(json!({
            "id": "ignored",
            "question_key": "ocean-9",
            "stem": "Deep question",
            "option_pool": {"a": "first", "b": "second"},
            "correct_answer_ids": ["a"],
        }));

        match row.normalize().expect("normalizes") {
            Question::Ocean(q) => assert_eq!(q.question_key, "ocean-9"),
            other => panic!("expected ocean question, got {other:?}"),
        }
    }

    #[test]
    fn missing_correct_answer_normalizes_to_none() {
        let row = decode(json!({"id": "std-2", "title": "Open", "type": "fill"}));
        match row.normalize().expect("normalizes") {
            Question::Standard(q) => assert!(q.correct.is_none()),
            other => panic!("expected standard question, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_shape_is_rejected() {
        let row = decode(json!({"options": ["A"]}));
        assert!(matches!(
            row.normalize(),
            Err(NormalizeError::UnrecognizedShape)
        ));
    }

    #[test]
    fn blank_title_fails_validation() {
        let row = decode(json!({"id": "std-3", "title": "", "type": "single"}));
        assert!(matches!(row.normalize(), Err(NormalizeError::Invalid(_))));
    }
}
