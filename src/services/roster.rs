//! Team and score record resolution: scan a sheet's rows against a fixed
//! priority list of identifier fields for the local user id.

use tracing::{info, warn};

use crate::dao::sheets::SheetsClient;
use crate::dto::record::RecordRow;
use crate::state::SharedState;

/// Identifier fields checked in priority order during a roster scan.
pub const IDENTIFIER_FIELDS: [&str; 6] =
    ["user_id", "uid", "member_id", "account", "phone", "email"];

/// Find the row matching `user_id`, walking the identifier fields in
/// priority order: a match on an earlier field wins over any match on a
/// later one.
pub fn match_record<'a>(records: &'a [RecordRow], user_id: &str) -> Option<&'a RecordRow> {
    for field in IDENTIFIER_FIELDS {
        for row in records {
            if row.field_text(field).as_deref() == Some(user_id) {
                return Some(row);
            }
        }
    }
    None
}

/// Resolve the contestant's team/profile record from the general sheet and
/// store the outcome. Failures are stored, never propagated: the other
/// resolutions of a stage activation must not be blocked.
pub async fn resolve_team(
    state: &SharedState,
    sheets: &SheetsClient,
    sheet_id: &str,
    user_id: &str,
) {
    match sheets.fetch_records(sheet_id).await {
        Ok(records) => {
            let matched = match_record(&records, user_id).map(|row| row.record_id.clone());
            match &matched {
                Some(record_id) => info!(sheet_id, record_id, "resolved team record"),
                None => warn!(sheet_id, user_id, "no team record matched"),
            }
            let mut roster = state.roster().write().await;
            roster.team_record_id = matched;
            roster.team_error = None;
        }
        Err(err) => {
            warn!(sheet_id, error = %err, "team record resolution failed");
            let mut roster = state.roster().write().await;
            roster.team_error = Some(err.to_string());
        }
    }
}

/// Resolve the contestant's score record from the score sheet and store the
/// outcome. Independent of the team resolution.
pub async fn resolve_score(
    state: &SharedState,
    sheets: &SheetsClient,
    sheet_id: &str,
    user_id: &str,
) {
    match sheets.fetch_records(sheet_id).await {
        Ok(records) => {
            let matched = match_record(&records, user_id).map(|row| row.record_id.clone());
            match &matched {
                Some(record_id) => info!(sheet_id, record_id, "resolved score record"),
                None => warn!(sheet_id, user_id, "no score record matched"),
            }
            let mut roster = state.roster().write().await;
            roster.score_record_id = matched;
            roster.score_error = None;
        }
        Err(err) => {
            warn!(sheet_id, error = %err, "score record resolution failed");
            let mut roster = state.roster().write().await;
            roster.score_error = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(record_id: &str, fields: serde_json::Value) -> RecordRow {
        serde_json::from_value(json!({"record_id": record_id, "fields": fields}))
            .expect("row decodes")
    }

    #[test]
    fn earlier_identifier_fields_win() {
        let records = vec![
            row("r1", json!({"email": "u-7"})),
            row("r2", json!({"uid": "u-7"})),
        ];
        // `uid` outranks `email` even though r1 appears first.
        assert_eq!(
            match_record(&records, "u-7").map(|r| r.record_id.as_str()),
            Some("r2")
        );
    }

    #[test]
    fn no_match_returns_none() {
        let records = vec![row("r1", json!({"uid": "someone-else"}))];
        assert!(match_record(&records, "u-7").is_none());
    }

    #[test]
    fn numeric_identifiers_match_as_text() {
        let records = vec![row("r1", json!({"phone": 13800001111u64}))];
        assert_eq!(
            match_record(&records, "13800001111").map(|r| r.record_id.as_str()),
            Some("r1")
        );
    }
}
