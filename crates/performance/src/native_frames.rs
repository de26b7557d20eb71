//! Slow and frozen frame counts per transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::lock;
use crate::native::{NativeBridge, NativeFrames};
use crate::span::Measurement;
use crate::transaction::TransactionEvent;

pub const FRAMES_TOTAL: &str = "frames_total";
pub const FRAMES_SLOW: &str = "frames_slow";
pub const FRAMES_FROZEN: &str = "frames_frozen";

/// Frames drawn between two counter snapshots.
///
/// Returns `None` if any counter went backwards, which happens when the
/// native side reset its counters.
pub fn frames_delta(start: NativeFrames, end: NativeFrames) -> Option<NativeFrames> {
    Some(NativeFrames {
        total_frames: end.total_frames.checked_sub(start.total_frames)?,
        slow_frames: end.slow_frames.checked_sub(start.slow_frames)?,
        frozen_frames: end.frozen_frames.checked_sub(start.frozen_frames)?,
    })
}

/// Snapshots native frame counters at transaction start and end.
pub struct NativeFramesTracker<B> {
    bridge: Arc<B>,
    starts: Mutex<HashMap<String, NativeFrames>>,
}

impl<B> std::fmt::Debug for NativeFramesTracker<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFramesTracker")
            .field("pending", &lock(&self.starts).len())
            .finish()
    }
}

impl<B: NativeBridge> NativeFramesTracker<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        Self {
            bridge,
            starts: Mutex::new(HashMap::new()),
        }
    }

    /// Record the counters at the start of a transaction.
    pub async fn on_transaction_start(&self, span_id: &str) {
        match self.bridge.fetch_native_frames().await {
            Some(frames) => {
                lock(&self.starts).insert(span_id.to_string(), frames);
            }
            None => tracing::debug!("Native frames unavailable at transaction start"),
        }
    }

    /// Drop the start snapshot of a transaction that will not be sent.
    pub fn forget(&self, span_id: &str) {
        lock(&self.starts).remove(span_id);
    }

    /// Number of transactions with a pending start snapshot.
    pub fn pending(&self) -> usize {
        lock(&self.starts).len()
    }

    /// Add frame measurements to a finished transaction event.
    pub async fn process_event(&self, event: &mut TransactionEvent) -> bool {
        let start = lock(&self.starts).remove(&event.span_id);
        let Some(start) = start else {
            return false;
        };
        let Some(end) = self.bridge.fetch_native_frames().await else {
            tracing::debug!("Native frames unavailable at transaction end");
            return false;
        };
        let Some(delta) = frames_delta(start, end) else {
            tracing::warn!("Native frame counters went backwards, skipping frame measurements");
            return false;
        };

        event.set_measurement(FRAMES_TOTAL, Measurement::count(delta.total_frames as f64));
        event.set_measurement(FRAMES_SLOW, Measurement::count(delta.slow_frames as f64));
        event.set_measurement(FRAMES_FROZEN, Measurement::count(delta.frozen_frames as f64));
        true
    }
}
