//! Local persisted station state: session identity and answer history
//! survive a reload under a fixed storage key.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dto::submission::AnswerRecord;

/// Fixed storage key for the persisted session.
pub const SESSION_STORAGE_KEY: &str = "podium-session.json";
/// Shared storage key holding the leader lease.
pub const LEASE_STORAGE_KEY: &str = "podium-leader-lease.json";

/// Everything the station persists between reloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredSession {
    /// Platform user id of the logged-in contestant.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Authentication token from the (out-of-scope) login screen.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Answer history keyed by question id.
    #[serde(default)]
    pub answers: IndexMap<String, AnswerRecord>,
}

impl StoredSession {
    /// Session-readiness plus authentication: both are required before the
    /// transport may receive connection configuration.
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some() && self.auth_token.is_some()
    }
}

/// File-backed store under the station's data directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    /// Store writing the session file into `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            path: dir.join(SESSION_STORAGE_KEY),
        }
    }

    /// Path of the shared leader-lease key next to the session file.
    pub fn lease_path(&self) -> PathBuf {
        self.path
            .parent()
            .map(|dir| dir.join(LEASE_STORAGE_KEY))
            .unwrap_or_else(|| PathBuf::from(LEASE_STORAGE_KEY))
    }

    /// Load the persisted session, falling back to an empty one when the
    /// file is absent or unreadable.
    pub fn load(&self) -> StoredSession {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<StoredSession>(&contents) {
                Ok(session) => {
                    info!(path = %self.path.display(), "loaded persisted session");
                    session
                }
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "failed to parse persisted session; starting fresh"
                    );
                    StoredSession::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => StoredSession::default(),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read persisted session; starting fresh"
                );
                StoredSession::default()
            }
        }
    }

    /// Persist the session. Failures are logged; the in-memory state stays
    /// authoritative for the rest of the run.
    pub fn save(&self, session: &StoredSession) {
        let payload = match serde_json::to_string_pretty(session) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize session");
                return;
            }
        };
        if let Some(dir) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(dir) {
                warn!(path = %dir.display(), error = %err, "failed to create session directory");
                return;
            }
        }
        if let Err(err) = fs::write(&self.path, payload) {
            warn!(path = %self.path.display(), error = %err, "failed to persist session");
        }
    }

    /// Append (or replace) one answer record and persist.
    pub fn record_answer(&self, question_key: &str, record: AnswerRecord) {
        let mut session = self.load();
        session.answers.insert(question_key.to_string(), record);
        self.save(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::submission::AnswerValue;
    use time::OffsetDateTime;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "podium-local-{tag}-{}",
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn missing_file_loads_an_empty_session() {
        let store = LocalStore::new(temp_dir("empty"));
        let session = store.load();
        assert!(session.user_id.is_none());
        assert!(!session.is_authenticated());
        assert!(session.answers.is_empty());
    }

    #[test]
    fn answers_survive_a_reload() {
        let dir = temp_dir("reload");
        let store = LocalStore::new(dir.clone());

        let mut session = StoredSession::default();
        session.user_id = Some("u-7".into());
        session.auth_token = Some("tok".into());
        store.save(&session);

        store.record_answer(
            "q1",
            AnswerRecord {
                value: AnswerValue::Text("B".into()),
                submitted_at: OffsetDateTime::UNIX_EPOCH,
                duration_ms: 2_500,
                meta: None,
            },
        );

        // A fresh store over the same directory sees the same state.
        let reloaded = LocalStore::new(dir).load();
        assert!(reloaded.is_authenticated());
        assert_eq!(reloaded.answers.len(), 1);
        assert_eq!(
            reloaded.answers.get("q1").map(|r| &r.value),
            Some(&AnswerValue::Text("B".into()))
        );
    }
}
