//! Tabular records, stage descriptors and event listings fetched from the
//! platform's HTTP collaborators.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a stage expects the client to do with its question source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Metadata-only stage, no question source.
    Meta,
    /// Standard stage with a prefetched question sheet.
    Standard,
    /// Grab stage drawing questions one by one from a shared pool.
    Grab,
    /// Anything the client does not recognize.
    #[serde(other)]
    Unknown,
}

/// Configured data sources of one contest stage. Replaced wholesale on each
/// stage activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Short stage identifier used in host commands.
    pub stage_id: String,
    /// Backing record identifier of the stage row itself.
    pub record_id: String,
    /// Display name.
    pub name: String,
    /// Question sheet backing this stage, when it has one.
    #[serde(default)]
    pub question_sheet_id: Option<String>,
    /// Score sheet receiving judged results.
    #[serde(default)]
    pub score_sheet_id: Option<String>,
    /// General-purpose sheet (team directory and the like).
    #[serde(default)]
    pub general_sheet_id: Option<String>,
    /// Stage kind; unrecognized values decode to [`StageKind::Unknown`].
    #[serde(default = "StageConfig::unknown_kind")]
    pub kind: StageKind,
}

impl StageConfig {
    fn unknown_kind() -> StageKind {
        StageKind::Unknown
    }
}

/// One contest event with its ordered stage list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Backing record identifier of the event.
    pub record_id: String,
    /// Display name.
    pub name: String,
    /// Stages of this event in running order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// A row of a tabular sheet: record id plus its named fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRow {
    /// Record identifier used for patches.
    pub record_id: String,
    /// Field values keyed by field name, in sheet order.
    #[serde(default)]
    pub fields: IndexMap<String, Value>,
}

impl RecordRow {
    /// Read a field as trimmed text, if it is a string or number.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_stage_kind_decodes_as_unknown() {
        let config: StageConfig = serde_json::from_value(json!({
            "stage_id": "s1",
            "record_id": "rec1",
            "name": "Warmup",
            "kind": "carnival",
        }))
        .expect("stage decodes");
        assert_eq!(config.kind, StageKind::Unknown);
    }

    #[test]
    fn field_text_trims_and_rejects_blanks() {
        let row: RecordRow = serde_json::from_value(json!({
            "record_id": "r1",
            "fields": {"uid": "  u-7  ", "phone": 1234, "note": "", "flag": true},
        }))
        .expect("row decodes");
        assert_eq!(row.field_text("uid").as_deref(), Some("u-7"));
        assert_eq!(row.field_text("phone").as_deref(), Some("1234"));
        assert_eq!(row.field_text("note"), None);
        assert_eq!(row.field_text("flag"), None);
        assert_eq!(row.field_text("missing"), None);
    }
}
