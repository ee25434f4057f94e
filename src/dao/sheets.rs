//! Tabular-record collaborator: event listings, sheet scans and patches.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::http::{ApiClient, ApiResult};
use crate::dto::record::{EventRecord, RecordRow};
use crate::dto::submission::AnswerValue;

/// Client for the tabular-record endpoints.
#[derive(Clone)]
pub struct SheetsClient {
    api: ApiClient,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<RecordRow>,
}

#[derive(Debug, Serialize)]
struct PatchBody<'a> {
    fields: &'a IndexMap<String, Value>,
}

/// A judged submission written to the scoring sheet.
#[derive(Debug, Serialize)]
pub struct JudgedResult<'a> {
    /// Question the result belongs to.
    pub question_key: &'a str,
    /// Submitted value.
    pub value: &'a AnswerValue,
    /// Local verdict; `None` when correctness could not be decided.
    pub correct: Option<bool>,
    /// Time spent on the question, in milliseconds.
    pub duration_ms: u64,
    /// Wall-clock submission stamp in unix milliseconds.
    pub submitted_at_ms: u64,
}

impl SheetsClient {
    /// Client over the shared API plumbing.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// List the configured contest events with their stage lists.
    pub async fn fetch_events(&self) -> ApiResult<Vec<EventRecord>> {
        let response: EventsResponse = self.api.get_json("events").await?;
        Ok(response.events)
    }

    /// Fetch every row of a sheet.
    pub async fn fetch_records(&self, sheet_id: &str) -> ApiResult<Vec<RecordRow>> {
        let path = format!("sheets/{sheet_id}/records");
        let response: RecordsResponse = self.api.get_json(&path).await?;
        Ok(response.records)
    }

    /// Patch named fields of one record.
    pub async fn patch_record(
        &self,
        sheet_id: &str,
        record_id: &str,
        fields: &IndexMap<String, Value>,
    ) -> ApiResult<()> {
        let path = format!("sheets/{sheet_id}/records/{record_id}");
        self.api.patch_json(&path, &PatchBody { fields }).await
    }

    /// Write a judged submission to the scoring sheet.
    pub async fn submit_judged_result(
        &self,
        sheet_id: &str,
        record_id: &str,
        result: &JudgedResult<'_>,
    ) -> ApiResult<()> {
        let path = format!("sheets/{sheet_id}/records/{record_id}/results");
        self.api.post_json::<_, serde_json::Value>(&path, result).await?;
        Ok(())
    }
}
