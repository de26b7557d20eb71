//! Transactions and the events they produce when finished.
//!
//! A [`Transaction`] is mutable until it finishes. Finishing sets the end
//! timestamp, runs the before-finish callbacks in registration order, closes
//! or trims children relative to the final end, and freezes it. Every
//! mutator on a frozen transaction is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::clock::timestamp_in_seconds;
use crate::span::{generate_span_id, generate_trace_id, Measurement, Span, SpanStatus};

/// Data key holding the id of the profile captured for a transaction.
pub const PROFILE_ID_KEY: &str = "profile_id";

/// Context key under which the profile id is sent.
pub const PROFILE_CONTEXT: &str = "profile";

/// Context key of the trace context.
pub const TRACE_CONTEXT: &str = "trace";

/// Callback run right before a transaction freezes.
pub type BeforeFinishCallback = Box<dyn FnOnce(&mut Transaction) + Send>;

/// A root span with children, measurements and tags.
pub struct Transaction {
    name: String,
    op: String,
    trace_id: String,
    span_id: String,
    start_timestamp: f64,
    end_timestamp: Option<f64>,
    sampled: Option<bool>,
    status: SpanStatus,
    spans: Vec<Span>,
    measurements: BTreeMap<String, Measurement>,
    tags: BTreeMap<String, String>,
    data: BTreeMap<String, Value>,
    before_finish: Vec<BeforeFinishCallback>,
    finished: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("op", &self.op)
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("start_timestamp", &self.start_timestamp)
            .field("end_timestamp", &self.end_timestamp)
            .field("sampled", &self.sampled)
            .field("status", &self.status)
            .field("spans", &self.spans.len())
            .field("before_finish", &self.before_finish.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Transaction {
    /// Start a transaction now.
    pub fn new(name: &str, op: &str) -> Self {
        Self {
            name: name.to_string(),
            op: op.to_string(),
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            start_timestamp: timestamp_in_seconds(),
            end_timestamp: None,
            sampled: None,
            status: SpanStatus::Ok,
            spans: Vec::new(),
            measurements: BTreeMap::new(),
            tags: BTreeMap::new(),
            data: BTreeMap::new(),
            before_finish: Vec::new(),
            finished: false,
        }
    }

    /// Override the start timestamp.
    pub fn with_start_timestamp(mut self, start: f64) -> Self {
        self.start_timestamp = start;
        self
    }

    /// Set the sampling decision.
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = Some(sampled);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn start_timestamp(&self) -> f64 {
        self.start_timestamp
    }

    pub fn end_timestamp(&self) -> Option<f64> {
        self.end_timestamp
    }

    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// A transaction only counts as sampled with an explicit positive decision.
    pub fn is_sampled(&self) -> bool {
        self.sampled == Some(true)
    }

    pub fn status(&self) -> SpanStatus {
        self.status
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    pub fn measurements(&self) -> &BTreeMap<String, Measurement> {
        &self.measurements
    }

    pub fn measurement(&self, name: &str) -> Option<&Measurement> {
        self.measurements.get(name)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Id of the profile captured for this transaction, if any.
    pub fn profile_id(&self) -> Option<&str> {
        self.data.get(PROFILE_ID_KEY).and_then(Value::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of children that have not ended yet.
    pub fn open_children(&self) -> usize {
        self.spans.iter().filter(|s| !s.is_finished()).count()
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    pub fn set_name(&mut self, name: &str) -> bool {
        self.mutate(|t| t.name = name.to_string())
    }

    pub fn set_op(&mut self, op: &str) -> bool {
        self.mutate(|t| t.op = op.to_string())
    }

    pub fn set_status(&mut self, status: SpanStatus) -> bool {
        self.mutate(|t| t.status = status)
    }

    pub fn set_sampled(&mut self, sampled: bool) -> bool {
        self.mutate(|t| t.sampled = Some(sampled))
    }

    pub fn set_start_timestamp(&mut self, start: f64) -> bool {
        self.mutate(|t| t.start_timestamp = start)
    }

    /// Move the end timestamp. Only meaningful inside a before-finish callback.
    pub fn set_end_timestamp(&mut self, end: f64) -> bool {
        self.mutate(|t| t.end_timestamp = Some(end))
    }

    pub fn set_measurement(&mut self, name: &str, measurement: Measurement) -> bool {
        self.mutate(|t| {
            t.measurements.insert(name.to_string(), measurement);
        })
    }

    pub fn set_tag(&mut self, key: &str, value: &str) -> bool {
        self.mutate(|t| {
            t.tags.insert(key.to_string(), value.to_string());
        })
    }

    pub fn set_data(&mut self, key: &str, value: Value) -> bool {
        self.mutate(|t| {
            t.data.insert(key.to_string(), value);
        })
    }

    /// Register a callback to run right before the transaction freezes.
    pub fn register_before_finish(&mut self, callback: BeforeFinishCallback) -> bool {
        if self.finished {
            return false;
        }
        self.before_finish.push(callback);
        true
    }

    /// Start a child span now. Returns its id.
    pub fn start_child(&mut self, op: &str, description: Option<&str>) -> Option<String> {
        self.start_child_at(op, description, timestamp_in_seconds())
    }

    /// Start a child span at the given timestamp. Returns its id.
    pub fn start_child_at(&mut self, op: &str, description: Option<&str>, start: f64) -> Option<String> {
        if self.finished {
            return None;
        }
        let span = Span::new(&self.trace_id, &self.span_id, op, description).with_start_timestamp(start);
        let id = span.span_id.clone();
        self.spans.push(span);
        Some(id)
    }

    /// Add an already built child span.
    pub fn add_child(&mut self, mut span: Span) -> Option<String> {
        if self.finished {
            return None;
        }
        span.trace_id = self.trace_id.clone();
        span.parent_span_id = self.span_id.clone();
        let id = span.span_id.clone();
        self.spans.push(span);
        Some(id)
    }

    /// End a child span. Returns `false` if it is unknown or already ended.
    pub fn finish_child(&mut self, span_id: &str, end: f64) -> bool {
        if self.finished {
            return false;
        }
        match self.spans.iter_mut().find(|s| s.span_id == span_id) {
            Some(span) => span.finish_at(end),
            None => false,
        }
    }

    /// Set the status of a child span.
    pub fn set_child_status(&mut self, span_id: &str, status: SpanStatus) -> bool {
        if self.finished {
            return false;
        }
        match self.spans.iter_mut().find(|s| s.span_id == span_id) {
            Some(span) => {
                span.status = status;
                true
            }
            None => false,
        }
    }

    fn mutate(&mut self, f: impl FnOnce(&mut Self)) -> bool {
        if self.finished {
            return false;
        }
        f(self);
        true
    }

    // ========================================================================
    // Finishing
    // ========================================================================

    /// Finish at the given timestamp. Returns `false` if already finished.
    pub fn finish(&mut self, end: f64) -> bool {
        if self.finished {
            return false;
        }
        self.end_timestamp = Some(end);

        let callbacks = std::mem::take(&mut self.before_finish);
        for callback in callbacks {
            callback(self);
        }

        let end = self.end_timestamp.unwrap_or(end);
        self.spans.retain_mut(|span| {
            if span.start_timestamp > end {
                tracing::debug!("Discarding span {} started after its transaction ended", span.op);
                return false;
            }
            if !span.is_finished() {
                span.finish_at(end);
                span.status = SpanStatus::Cancelled;
            }
            true
        });

        self.finished = true;
        true
    }

    /// A finished copy ending at `end`, without callbacks.
    ///
    /// Stands in for the transaction while its before-finish callbacks run.
    pub(crate) fn frozen_copy(&self, end: f64) -> Transaction {
        Transaction {
            name: self.name.clone(),
            op: self.op.clone(),
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            start_timestamp: self.start_timestamp,
            end_timestamp: Some(end),
            sampled: self.sampled,
            status: self.status,
            spans: self.spans.clone(),
            measurements: self.measurements.clone(),
            tags: self.tags.clone(),
            data: self.data.clone(),
            before_finish: Vec::new(),
            finished: true,
        }
    }

    /// Snapshot of the transaction as a sendable event.
    pub fn to_event(&self) -> TransactionEvent {
        let mut contexts = BTreeMap::new();
        contexts.insert(
            TRACE_CONTEXT.to_string(),
            json!({
                "trace_id": self.trace_id,
                "span_id": self.span_id,
                "op": self.op,
                "status": self.status,
            }),
        );
        if let Some(profile_id) = self.profile_id() {
            contexts.insert(PROFILE_CONTEXT.to_string(), json!({ "profile_id": profile_id }));
        }

        TransactionEvent {
            event_id: Uuid::new_v4().simple().to_string(),
            event_type: "transaction".to_string(),
            transaction: self.name.clone(),
            op: self.op.clone(),
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            start_timestamp: self.start_timestamp,
            timestamp: self.end_timestamp.unwrap_or(self.start_timestamp),
            sampled: self.is_sampled(),
            status: self.status,
            spans: self.spans.clone(),
            measurements: self.measurements.clone(),
            tags: self.tags.clone(),
            contexts,
            release: None,
            environment: None,
        }
    }
}

/// A finished transaction ready to be sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction: String,
    #[serde(skip)]
    pub op: String,
    #[serde(skip)]
    pub trace_id: String,
    #[serde(skip)]
    pub span_id: String,
    pub start_timestamp: f64,
    pub timestamp: f64,
    #[serde(skip)]
    pub sampled: bool,
    #[serde(skip)]
    pub status: SpanStatus,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub measurements: BTreeMap<String, Measurement>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub contexts: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl TransactionEvent {
    /// Profile id carried in the profile context.
    pub fn profile_id(&self) -> Option<&str> {
        self.contexts
            .get(PROFILE_CONTEXT)
            .and_then(|ctx| ctx.get(PROFILE_ID_KEY))
            .and_then(Value::as_str)
    }

    /// Remove the profile context, returning the id it carried.
    pub fn take_profile_id(&mut self) -> Option<String> {
        let ctx = self.contexts.remove(PROFILE_CONTEXT)?;
        ctx.get(PROFILE_ID_KEY).and_then(Value::as_str).map(str::to_string)
    }

    /// Set a measurement on the event.
    pub fn set_measurement(&mut self, name: &str, measurement: Measurement) {
        self.measurements.insert(name.to_string(), measurement);
    }
}
