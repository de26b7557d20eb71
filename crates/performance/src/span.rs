//! Spans, statuses and measurements.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::clock::timestamp_in_seconds;

/// Span op of the time-to-initial-display span.
pub const OP_INITIAL_DISPLAY: &str = "ui.load.initial_display";

/// Span op of the time-to-full-display span.
pub const OP_FULL_DISPLAY: &str = "ui.load.full_display";

/// Span op of the navigation bookkeeping span.
pub const OP_NAVIGATION_PROCESSING: &str = "navigation.processing";

/// Span op of a cold app start.
pub const OP_APP_START_COLD: &str = "app.start.cold";

/// Span op of a warm app start.
pub const OP_APP_START_WARM: &str = "app.start.warm";

/// Generate a 32 hex character trace id.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a 16 hex character span id.
pub fn generate_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Outcome of a span or transaction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Ok,
    Cancelled,
    DeadlineExceeded,
    InternalError,
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanStatus::Ok => write!(f, "ok"),
            SpanStatus::Cancelled => write!(f, "cancelled"),
            SpanStatus::DeadlineExceeded => write!(f, "deadline_exceeded"),
            SpanStatus::InternalError => write!(f, "internal_error"),
        }
    }
}

/// A named value with a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    /// A measurement in milliseconds.
    pub fn millis(value: f64) -> Self {
        Self {
            value,
            unit: "millisecond".to_string(),
        }
    }

    /// A unitless count.
    pub fn count(value: f64) -> Self {
        Self {
            value,
            unit: "none".to_string(),
        }
    }
}

/// A timed sub-operation of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_id: String,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_timestamp: f64,
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<f64>,
    #[serde(default)]
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Span {
    /// Start a span now.
    pub fn new(trace_id: &str, parent_span_id: &str, op: &str, description: Option<&str>) -> Self {
        Self {
            span_id: generate_span_id(),
            parent_span_id: parent_span_id.to_string(),
            trace_id: trace_id.to_string(),
            op: op.to_string(),
            description: description.map(str::to_string),
            start_timestamp: timestamp_in_seconds(),
            end_timestamp: None,
            status: SpanStatus::Ok,
            data: BTreeMap::new(),
        }
    }

    /// Override the start timestamp.
    pub fn with_start_timestamp(mut self, start: f64) -> Self {
        self.start_timestamp = start;
        self
    }

    /// Check if the span has ended.
    pub fn is_finished(&self) -> bool {
        self.end_timestamp.is_some()
    }

    /// End the span unless it already ended. Returns `true` if it was ended now.
    pub fn finish_at(&mut self, end: f64) -> bool {
        if self.is_finished() {
            return false;
        }
        self.end_timestamp = Some(end);
        true
    }

    /// Span duration in milliseconds, if ended.
    pub fn duration_ms(&self) -> Option<f64> {
        self.end_timestamp.map(|end| (end - self.start_timestamp) * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formats() {
        let trace_id = generate_trace_id();
        let span_id = generate_span_id();
        assert_eq!(trace_id.len(), 32);
        assert_eq!(span_id.len(), 16);
        assert!(trace_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_span_id(), span_id);
    }

    #[test]
    fn test_span_finish_once() {
        let mut span = Span::new("t", "p", "db.query", Some("select")).with_start_timestamp(10.0);
        assert!(!span.is_finished());
        assert!(span.finish_at(10.25));
        assert!(!span.finish_at(11.0));
        assert_eq!(span.end_timestamp, Some(10.25));
        assert_eq!(span.duration_ms(), Some(250.0));
    }

    #[test]
    fn test_status_display_matches_wire() {
        for status in [SpanStatus::Ok, SpanStatus::Cancelled, SpanStatus::DeadlineExceeded] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, Value::String(status.to_string()));
        }
    }

    #[test]
    fn test_span_serializes_end_as_timestamp() {
        let mut span = Span::new("t", "p", "ui.load", None).with_start_timestamp(1.0);
        span.finish_at(2.0);
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["timestamp"], 2.0);
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_measurement_units() {
        assert_eq!(Measurement::millis(1.0).unit, "millisecond");
        assert_eq!(Measurement::count(3.0).unit, "none");
    }
}
