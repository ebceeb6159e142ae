//! Identifier and timestamp helpers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// UTC timestamp used on summaries.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a time-ordered run id.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::now_v7()
}
