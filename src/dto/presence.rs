//! Presence payloads and auxiliary control signals carried by the broker.

/// Retained presence payload meaning the station is reachable.
pub const PRESENCE_ONLINE: &str = "online";
/// Retained presence payload meaning the station is gone.
pub const PRESENCE_OFFLINE: &str = "offline";

/// Host command topic.
pub const TOPIC_COMMANDS: &str = "cmd";
/// Auxiliary host control topic.
pub const TOPIC_CONTROL: &str = "quiz/control";

/// Presence topic for a given client id.
pub fn presence_topic(client_id: &str) -> String {
    format!("state/{client_id}")
}

/// Auxiliary signal on the control topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// The host opened buzzing for the current question.
    StartBuzzing,
    /// The host judged the latest answer wrong.
    JudgedWrong,
    /// Unrecognized signal, kept for logging.
    Other(String),
}

impl ControlSignal {
    /// Parse a control payload; never fails, unknown payloads are preserved.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "start_buzzing" => Self::StartBuzzing,
            "wrong" => Self::JudgedWrong,
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_signals() {
        assert_eq!(
            ControlSignal::parse(" start_buzzing "),
            ControlSignal::StartBuzzing
        );
        assert_eq!(ControlSignal::parse("wrong"), ControlSignal::JudgedWrong);
        assert_eq!(
            ControlSignal::parse("pause"),
            ControlSignal::Other("pause".into())
        );
    }

    #[test]
    fn presence_topic_embeds_client_id() {
        assert_eq!(presence_topic("station-7"), "state/station-7");
    }
}
