//! Time to initial and full display of a screen.
//!
//! Both are recorded as child spans of the route transaction and as
//! millisecond measurements relative to the transaction start.

use tokio::sync::broadcast;

use crate::clock::seconds_to_ms_between;
use crate::frame_signal::{FrameSignal, FrameSignalReconciler};
use crate::idle::IdleTransaction;
use crate::native::NativeBridge;
use crate::span::{Measurement, SpanStatus, OP_FULL_DISPLAY, OP_INITIAL_DISPLAY};

/// Measurement name of the time to initial display.
pub const TIME_TO_INITIAL_DISPLAY: &str = "time_to_initial_display";

/// Measurement name of the time to full display.
pub const TIME_TO_FULL_DISPLAY: &str = "time_to_full_display";

/// Start the initial display span and end it with the next frame signal.
///
/// Returns the id of the span. If the listening cycle is superseded before
/// it resolves, the span ends as cancelled.
pub fn track_initial_display<B: NativeBridge>(
    transaction: &IdleTransaction,
    reconciler: &FrameSignalReconciler<B>,
) -> Option<String> {
    let start = transaction.start_timestamp();
    let name = transaction.name();
    let span_id = transaction.start_child_at(OP_INITIAL_DISPLAY, Some(&format!("{} initial display", name)), start)?;

    let signals = reconciler.subscribe();
    let cycle = reconciler.start_listening();

    let transaction = transaction.clone();
    let span = span_id.clone();
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                match wait_for_cycle(signals, cycle).await {
                    Some(signal) => record_initial_display(&transaction, &span, signal),
                    None => {
                        transaction.set_child_status(&span, SpanStatus::Cancelled);
                        transaction.finish_child(&span);
                    }
                }
            });
        }
        Err(_) => tracing::warn!("No async runtime, initial display is not tracked"),
    }

    Some(span_id)
}

async fn wait_for_cycle(mut signals: broadcast::Receiver<FrameSignal>, cycle: u64) -> Option<FrameSignal> {
    loop {
        match signals.recv().await {
            Ok(signal) if signal.cycle == cycle => return Some(signal),
            Ok(signal) if signal.cycle > cycle => return None,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

fn record_initial_display(transaction: &IdleTransaction, span_id: &str, signal: FrameSignal) {
    let start = transaction.start_timestamp();
    let end = signal.timestamp.max(start);

    if !transaction.finish_child_at(span_id, end) {
        tracing::debug!("Initial display resolved after the span ended");
        return;
    }
    if signal.is_fallback {
        tracing::debug!("Initial display of {} was not confirmed by a native frame", transaction.name());
    }
    transaction.set_measurement(TIME_TO_INITIAL_DISPLAY, Measurement::millis(seconds_to_ms_between(start, end)));
}

/// Record that the screen finished rendering its content at `timestamp`.
///
/// The full display is never earlier than the initial display.
pub fn record_full_display(transaction: &IdleTransaction, timestamp: f64) -> bool {
    let start = transaction.start_timestamp();
    let initial_end = transaction.with_transaction(|t| {
        t.spans()
            .iter()
            .find(|s| s.op == OP_INITIAL_DISPLAY)
            .and_then(|s| s.end_timestamp)
    });
    let end = initial_end.map_or(timestamp, |initial| timestamp.max(initial)).max(start);

    let name = transaction.name();
    let Some(span_id) = transaction.start_child_at(OP_FULL_DISPLAY, Some(&format!("{} full display", name)), start)
    else {
        return false;
    };
    transaction.finish_child_at(&span_id, end);
    transaction.set_measurement(TIME_TO_FULL_DISPLAY, Measurement::millis(seconds_to_ms_between(start, end)))
}
