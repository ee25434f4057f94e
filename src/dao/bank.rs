//! Question-bank collaborator: prefetched sets and grab-style single fetches.

use serde::Deserialize;
use tracing::warn;

use crate::dao::http::{ApiClient, ApiResult};
use crate::dto::question::{Question, RawQuestionRow};

/// Client for the question-bank endpoints.
#[derive(Clone)]
pub struct QuestionBankClient {
    api: ApiClient,
}

#[derive(Debug, Deserialize)]
struct QuestionSetResponse {
    #[serde(default)]
    questions: Vec<RawQuestionRow>,
}

#[derive(Debug, Deserialize)]
struct GrabResponse {
    question: Option<RawQuestionRow>,
    #[serde(default)]
    remaining: u64,
}

/// One question grabbed from a shared pool plus the pool's remaining count.
#[derive(Debug)]
pub struct GrabbedQuestion {
    /// The normalized question.
    pub question: Question,
    /// Questions left in the pool after this grab.
    pub remaining: u64,
}

impl QuestionBankClient {
    /// Client over the shared API plumbing.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetch and normalize the full question set of a sheet. Rows that fail
    /// to normalize are skipped with a warning instead of poisoning the set.
    pub async fn fetch_set(&self, sheet_id: &str) -> ApiResult<Vec<Question>> {
        let path = format!("banks/{sheet_id}/questions");
        let response: QuestionSetResponse = self.api.get_json(&path).await?;

        let mut questions = Vec::with_capacity(response.questions.len());
        for (index, row) in response.questions.into_iter().enumerate() {
            match row.normalize() {
                Ok(question) => questions.push(question),
                Err(err) => {
                    warn!(sheet_id, index, error = %err, "skipping malformed question row");
                }
            }
        }
        Ok(questions)
    }

    /// Grab the next question from a stage's shared pool. `None` when the
    /// pool is exhausted.
    pub async fn grab_next(&self, stage_id: &str) -> ApiResult<Option<GrabbedQuestion>> {
        let path = format!("stages/{stage_id}/grab");
        let response: GrabResponse = self.api.post_json(&path, &serde_json::json!({})).await?;

        let Some(row) = response.question else {
            return Ok(None);
        };
        match row.normalize() {
            Ok(question) => Ok(Some(GrabbedQuestion {
                question,
                remaining: response.remaining,
            })),
            Err(err) => {
                warn!(stage_id, error = %err, "grabbed question row failed to normalize");
                Ok(None)
            }
        }
    }
}
