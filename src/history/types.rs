use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One user-defined name/value pair recorded alongside an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomColumn {
    pub name: String,
    pub value: String,
}

/// One recorded shell command execution.
///
/// Identity for deduplication is the tuple (`local_username`, `hostname`,
/// `command`, `current_working_directory`, `home_directory`, `exit_code`,
/// `start_time`, `end_time`); `device_id` and custom columns are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub local_username: String,
    pub hostname: String,
    pub command: String,
    pub current_working_directory: String,
    pub home_directory: String,
    pub exit_code: i32,
    pub start_time: DateTime<Utc>,
    /// [`DateTime::UNIX_EPOCH`] marks a command that started but never finished.
    pub end_time: DateTime<Utc>,
    pub device_id: String,
    #[serde(default)]
    pub custom_columns: Vec<CustomColumn>,
}

impl HistoryEntry {
    /// Whether this entry was pre-saved when the command started and never
    /// completed. The zero instant doubles as a sentinel, so a command that
    /// genuinely finished at the epoch is indistinguishable.
    pub fn is_unfinished(&self) -> bool {
        self.end_time == DateTime::UNIX_EPOCH
    }
}

/// Ordering applied to search results. Newest first either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchOrder {
    #[default]
    EndTimeDesc,
    StartTimeDesc,
}

impl SearchOrder {
    pub(crate) const fn column(self) -> &'static str {
        match self {
            Self::EndTimeDesc => "end_time",
            Self::StartTimeDesc => "start_time",
        }
    }
}

/// Render an instant in the single canonical form the store keeps:
/// UTC, RFC 3339, nanosecond precision, `Z` suffix.
///
/// Identity comparisons are textual, so every timestamp written to or
/// compared against the store must go through here.
pub fn canonical_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp previously written by [`canonical_timestamp`] (any
/// RFC 3339 input is accepted and converted to UTC).
///
/// # Errors
///
/// Returns the chrono parse error for malformed input.
pub fn parse_canonical_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
