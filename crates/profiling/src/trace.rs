//! Raw JS engine trace format.
//!
//! This is the shape the native bridge hands back when profiling stops: a
//! Chrome-trace-like document with a flat sample list and a parent-linked
//! stack frame table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stack frame category used by the engine for interpreted JavaScript code.
pub const JAVASCRIPT_CATEGORY: &str = "JavaScript";

/// Stack frame category of the synthetic root frame.
pub const ROOT_CATEGORY: &str = "root";

/// A raw JS engine trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JsTrace {
    /// Samples in capture order
    pub samples: Vec<JsSample>,
    /// Stack frame table keyed by frame id
    pub stack_frames: BTreeMap<u64, JsStackFrame>,
    /// Trace events (unused by conversion, kept for passthrough)
    #[serde(default)]
    pub trace_events: Vec<serde_json::Value>,
}

impl JsTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stack frame.
    pub fn with_frame(mut self, id: u64, frame: JsStackFrame) -> Self {
        self.stack_frames.insert(id, frame);
        self
    }

    /// Add a sample taken on `tid` at `ts_us` microseconds with leaf frame `sf`.
    pub fn with_sample(mut self, tid: &str, ts_us: u64, sf: u64) -> Self {
        self.samples.push(JsSample::new(tid, ts_us, sf));
        self
    }
}

/// A single sample in the raw trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsSample {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub name: String,
    /// Timestamp in microseconds, encoded as a decimal string
    pub ts: String,
    #[serde(default)]
    pub pid: u64,
    /// Thread id, encoded as a string
    pub tid: String,
    #[serde(default)]
    pub weight: String,
    /// Leaf stack frame id
    pub sf: u64,
}

impl JsSample {
    /// Create a sample with default cpu/name/weight fields.
    pub fn new(tid: &str, ts_us: u64, sf: u64) -> Self {
        Self {
            cpu: "-1".to_string(),
            name: String::new(),
            ts: ts_us.to_string(),
            pid: 0,
            tid: tid.to_string(),
            weight: "1".to_string(),
            sf,
        }
    }
}

/// An entry in the raw stack frame table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JsStackFrame {
    /// Frame name; for JavaScript frames `function(file:line:col)`
    pub name: String,
    /// Frame category (`JavaScript`, `Native`, `root`, ...)
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Parent frame id, `None` at the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
}

impl JsStackFrame {
    /// The synthetic root frame.
    pub fn root() -> Self {
        Self {
            name: "[root]".to_string(),
            category: ROOT_CATEGORY.to_string(),
            line: None,
            column: None,
            parent: None,
        }
    }

    /// A JavaScript frame.
    pub fn javascript(name: impl Into<String>, parent: Option<u64>) -> Self {
        Self {
            name: name.into(),
            category: JAVASCRIPT_CATEGORY.to_string(),
            line: None,
            column: None,
            parent,
        }
    }

    /// A frame of any other category, e.g. a host function.
    pub fn native(name: impl Into<String>, parent: Option<u64>) -> Self {
        Self {
            name: name.into(),
            category: "Native".to_string(),
            line: None,
            column: None,
            parent,
        }
    }

    /// Check if this is the synthetic root frame.
    pub fn is_root(&self) -> bool {
        self.category == ROOT_CATEGORY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_deserializes_engine_json() {
        let json = r#"{
            "samples": [
                {"cpu": "-1", "name": "", "ts": "10", "pid": 1, "tid": "14", "weight": "1", "sf": 2}
            ],
            "stackFrames": {
                "1": {"name": "[root]", "category": "root"},
                "2": {"name": "render(app:///main.jsbundle:3:7)", "category": "JavaScript", "line": "3", "column": "7", "parent": 1}
            },
            "traceEvents": []
        }"#;

        let trace: JsTrace = serde_json::from_str(json).unwrap();
        assert_eq!(trace.samples.len(), 1);
        assert_eq!(trace.samples[0].tid, "14");
        assert_eq!(trace.stack_frames.len(), 2);
        assert!(trace.stack_frames[&1].is_root());
        assert_eq!(trace.stack_frames[&2].parent, Some(1));
    }

    #[test]
    fn test_trace_builder() {
        let trace = JsTrace::new()
            .with_frame(1, JsStackFrame::root())
            .with_frame(2, JsStackFrame::javascript("a(app.js:1:1)", Some(1)))
            .with_sample("1", 100, 2);

        assert_eq!(trace.samples[0].ts, "100");
        assert_eq!(trace.samples[0].sf, 2);
        assert!(!trace.stack_frames[&2].is_root());
    }
}
