//! App start attribution.
//!
//! The native side records when the process started. The app start duration
//! runs from there to the start of the first route transaction, which is
//! pulled back to cover it.

use crate::clock::seconds_to_ms_between;
use crate::native::NativeAppStart;
use crate::span::{Measurement, Span, OP_APP_START_COLD, OP_APP_START_WARM};
use crate::transaction::Transaction;

/// Measurement name of a cold start.
pub const APP_START_COLD: &str = "app_start_cold";

/// Measurement name of a warm start.
pub const APP_START_WARM: &str = "app_start_warm";

/// Op of a transaction covering app start.
pub const UI_LOAD_OP: &str = "ui.load";

/// Name of the transaction reporting app start without routing.
pub const APP_START_TRANSACTION: &str = "App Start";

/// A measured app start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppStartMetrics {
    /// App start in seconds since the epoch
    pub app_start_timestamp: f64,
    /// When the app counts as started, in seconds since the epoch
    pub end_timestamp: f64,
    pub duration_ms: f64,
    pub is_cold_start: bool,
}

impl AppStartMetrics {
    /// Measurement name for this kind of start.
    pub fn measurement_name(&self) -> &'static str {
        if self.is_cold_start {
            APP_START_COLD
        } else {
            APP_START_WARM
        }
    }

    /// Span op for this kind of start.
    pub fn span_op(&self) -> &'static str {
        if self.is_cold_start {
            OP_APP_START_COLD
        } else {
            OP_APP_START_WARM
        }
    }

    fn description(&self) -> &'static str {
        if self.is_cold_start {
            "Cold App Start"
        } else {
            "Warm App Start"
        }
    }
}

/// Measure an app start ending at `end_timestamp`.
///
/// Returns `None` for a start already reported, a negative or unmeasurable
/// duration, or one at least `max_duration_ms` long.
pub fn compute_app_start(app_start: &NativeAppStart, end_timestamp: f64, max_duration_ms: f64) -> Option<AppStartMetrics> {
    if app_start.did_fetch_app_start {
        tracing::debug!("App start was already reported");
        return None;
    }

    let app_start_timestamp = app_start.app_start_time / 1000.0;
    let duration_ms = seconds_to_ms_between(app_start_timestamp, end_timestamp);

    if !duration_ms.is_finite() || duration_ms < 0.0 {
        tracing::warn!("Discarding unmeasurable app start of {} ms", duration_ms);
        return None;
    }
    if duration_ms >= max_duration_ms {
        tracing::warn!(
            "Discarding app start of {} ms, longer than {} ms",
            duration_ms,
            max_duration_ms
        );
        return None;
    }

    Some(AppStartMetrics {
        app_start_timestamp,
        end_timestamp,
        duration_ms,
        is_cold_start: app_start.is_cold_start,
    })
}

/// Attribute a measured app start to a transaction.
///
/// Adds the app start span and measurement, switches the op to `ui.load`
/// and moves the transaction start back to the app start.
pub fn attach_app_start(transaction: &mut Transaction, metrics: &AppStartMetrics) -> bool {
    if transaction.is_finished() {
        return false;
    }

    let mut span = Span::new(
        transaction.trace_id(),
        transaction.span_id(),
        metrics.span_op(),
        Some(metrics.description()),
    )
    .with_start_timestamp(metrics.app_start_timestamp);
    span.finish_at(metrics.end_timestamp);

    transaction.add_child(span);
    transaction.set_op(UI_LOAD_OP);
    transaction.set_start_timestamp(metrics.app_start_timestamp);
    transaction.set_measurement(metrics.measurement_name(), Measurement::millis(metrics.duration_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(start_ms: f64, cold: bool) -> NativeAppStart {
        NativeAppStart {
            app_start_time: start_ms,
            is_cold_start: cold,
            did_fetch_app_start: false,
        }
    }

    #[test]
    fn test_cold_start_attached() {
        let metrics = compute_app_start(&native(1_000_000.0, true), 1_000.5, 60_000.0).unwrap();
        assert_eq!(metrics.duration_ms, 500.0);
        assert_eq!(metrics.measurement_name(), APP_START_COLD);

        let mut transaction = Transaction::new("Home", "navigation").with_start_timestamp(1_000.5);
        assert!(attach_app_start(&mut transaction, &metrics));

        assert_eq!(transaction.op(), UI_LOAD_OP);
        assert_eq!(transaction.start_timestamp(), 1_000.0);
        assert_eq!(transaction.measurement(APP_START_COLD).unwrap().value, 500.0);
        let span = &transaction.spans()[0];
        assert_eq!(span.op, OP_APP_START_COLD);
        assert_eq!(span.end_timestamp, Some(1_000.5));
    }

    #[test]
    fn test_warm_start_measurement() {
        let metrics = compute_app_start(&native(1_000_000.0, false), 1_000.5, 60_000.0).unwrap();
        let mut transaction = Transaction::new("Home", "navigation");
        attach_app_start(&mut transaction, &metrics);

        assert!(transaction.measurement(APP_START_COLD).is_none());
        assert_eq!(transaction.measurement(APP_START_WARM).unwrap().value, 500.0);
        assert_eq!(transaction.spans()[0].op, OP_APP_START_WARM);
    }

    #[test]
    fn test_outlier_discarded() {
        assert!(compute_app_start(&native(1_000_000.0, true), 1_070.0, 60_000.0).is_none());
        assert!(compute_app_start(&native(1_000_000.0, true), 1_060.0, 60_000.0).is_none());
        assert!(compute_app_start(&native(1_000_000.0, true), 1_059.9, 60_000.0).is_some());
    }

    #[test]
    fn test_negative_discarded() {
        assert!(compute_app_start(&native(2_000_000.0, true), 1_000.0, 60_000.0).is_none());
        assert!(compute_app_start(&native(f64::NAN, true), 1_000.0, 60_000.0).is_none());
    }

    #[test]
    fn test_already_fetched_skipped() {
        let mut app_start = native(1_000_000.0, true);
        app_start.did_fetch_app_start = true;
        assert!(compute_app_start(&app_start, 1_000.5, 60_000.0).is_none());
    }
}
