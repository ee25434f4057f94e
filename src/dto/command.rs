//! Host command grammar for the control topic.

/// A host command accepted by the dispatcher.
///
/// The grammar is case-insensitive and surrounding whitespace is ignored.
/// Anything that does not parse is not an error; it is simply not a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// `race-<N>`: select the event with ordinal `N`, zero-based internally.
    SelectEvent {
        /// Zero-based event index (`N - 1`).
        index: usize,
    },
    /// `<stageId>-start`: activate the named stage.
    ActivateStage {
        /// Identifier of the stage to activate.
        stage_id: String,
    },
    /// `start`: fetch the first question of a grab stage.
    StartGrab,
    /// `<digits>`, `q<digits>` or `question-<digits>`: jump the local
    /// question pointer, zero-based internally.
    JumpToQuestion {
        /// Zero-based question index (`N - 1`).
        index: usize,
    },
}

impl HostCommand {
    /// Parse a raw command payload, returning `None` when the text does not
    /// match the grammar.
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }

        if let Some(ordinal) = text.strip_prefix("race-").and_then(parse_ordinal) {
            return Some(Self::SelectEvent { index: ordinal - 1 });
        }

        if text == "start" {
            return Some(Self::StartGrab);
        }

        if let Some(stage_id) = text.strip_suffix("-start") {
            if !stage_id.is_empty() {
                return Some(Self::ActivateStage {
                    stage_id: stage_id.to_string(),
                });
            }
            return None;
        }

        let digits = text
            .strip_prefix("question-")
            .or_else(|| text.strip_prefix('q'))
            .unwrap_or(&text);
        if let Some(ordinal) = parse_ordinal(digits) {
            return Some(Self::JumpToQuestion { index: ordinal - 1 });
        }

        None
    }
}

/// Parse a strictly positive decimal ordinal.
fn parse_ordinal(text: &str) -> Option<usize> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match text.parse::<usize>() {
        Ok(value) if value >= 1 => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_selection() {
        assert_eq!(
            HostCommand::parse("race-3"),
            Some(HostCommand::SelectEvent { index: 2 })
        );
        assert_eq!(
            HostCommand::parse("  RACE-1  "),
            Some(HostCommand::SelectEvent { index: 0 })
        );
        assert_eq!(HostCommand::parse("race-0"), None);
        assert_eq!(HostCommand::parse("race-"), None);
        assert_eq!(HostCommand::parse("race-x"), None);
    }

    #[test]
    fn parses_stage_activation() {
        assert_eq!(
            HostCommand::parse("riddle7-start"),
            Some(HostCommand::ActivateStage {
                stage_id: "riddle7".into()
            })
        );
        assert_eq!(HostCommand::parse("-start"), None);
    }

    #[test]
    fn bare_start_is_grab_start_not_stage() {
        assert_eq!(HostCommand::parse("start"), Some(HostCommand::StartGrab));
        assert_eq!(HostCommand::parse(" Start "), Some(HostCommand::StartGrab));
    }

    #[test]
    fn parses_question_jumps() {
        for raw in ["4", "q4", "question-4", "Q4", "QUESTION-4"] {
            assert_eq!(
                HostCommand::parse(raw),
                Some(HostCommand::JumpToQuestion { index: 3 }),
                "raw = {raw}"
            );
        }
        assert_eq!(HostCommand::parse("0"), None);
        assert_eq!(HostCommand::parse("q0"), None);
    }

    #[test]
    fn rejects_noise() {
        for raw in ["", "   ", "hello", "race", "q-4", "question-", "4x"] {
            assert_eq!(HostCommand::parse(raw), None, "raw = {raw}");
        }
    }
}
