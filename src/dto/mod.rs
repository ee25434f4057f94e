use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod command;
pub mod presence;
pub mod question;
pub mod record;
pub mod submission;

/// Format a wall-clock instant for logs and notices.
pub fn format_timestamp(time: OffsetDateTime) -> String {
    time.format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
