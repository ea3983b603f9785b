use chrono::Utc;

/// Logical clock for answer records: milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
