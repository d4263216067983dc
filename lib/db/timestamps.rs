//! RFC3339 conversions shared by every entity's query module, since timestamp columns are
//! stored as TEXT.

use chrono::{DateTime, Utc};

use crate::{KeppelError, KeppelResult};

/// Formats a timestamp for storage.
pub(crate) fn to_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// Formats an optional timestamp for storage.
pub(crate) fn opt_to_text(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(to_text)
}

/// Parses a stored timestamp, failing loudly: a malformed timestamp is a data-corruption bug,
/// not a recoverable condition.
pub(crate) fn from_text(text: &str) -> KeppelResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KeppelError::InvariantViolated(format!("malformed timestamp {text:?}: {e}")))
}

/// Parses an optional stored timestamp.
pub(crate) fn opt_from_text(text: Option<String>) -> KeppelResult<Option<DateTime<Utc>>> {
    text.map(|t| from_text(&t)).transpose()
}
