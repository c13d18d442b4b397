pub mod analysis;
pub mod feedback;
pub mod knowledge;

pub use analysis::*;
pub use feedback::*;
pub use knowledge::*;

use chrono::{DateTime, Utc};

use super::DatabaseError;

/// Parse an RFC 3339 timestamp column.
pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptColumn {
            column: column.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a UUID column.
pub(crate) fn parse_uuid(column: &str, raw: &str) -> Result<uuid::Uuid, DatabaseError> {
    uuid::Uuid::parse_str(raw).map_err(|e| DatabaseError::CorruptColumn {
        column: column.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a JSON column.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::CorruptColumn {
        column: column.to_string(),
        reason: e.to_string(),
    })
}
