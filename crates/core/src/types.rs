/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// External timestamp wire format: second precision with a numeric offset,
/// e.g. `2024-03-01T16:04:05+00:00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Format a timestamp in the external wire format (second precision).
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// The current time in the external wire format.
pub fn now_timestamp() -> String {
    format_timestamp(chrono::Utc::now())
}
