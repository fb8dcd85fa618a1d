//! Timestamp helpers. Everything stored locally is Unix milliseconds.

/// Get the current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse an ISO 8601 timestamp into Unix milliseconds.
///
/// Returns `None` for unparseable input so callers can decide whether a
/// missing timestamp is an error.
pub fn parse_iso_millis(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .ok()
}
