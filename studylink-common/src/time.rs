//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds since the Unix epoch, the unit used in persisted snapshots
pub fn to_epoch_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Inverse of [`to_epoch_millis`]; `None` if the value is out of range
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
