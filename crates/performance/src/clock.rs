//! JS-side wall clock helpers.

use chrono::Utc;

/// Current time in seconds since the epoch.
pub fn timestamp_in_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
}

/// Current time in nanoseconds since the epoch.
pub fn now_ns() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .map(|ns| ns.max(0) as u64)
        .unwrap_or(0)
}

/// Milliseconds between two timestamps given in seconds.
pub fn seconds_to_ms_between(start: f64, end: f64) -> f64 {
    (end - start) * 1000.0
}
