//! Performance Tracing
//!
//! This crate provides the performance monitoring core of a mobile SDK:
//! transactions for screen loads and user interactions, enriched with data
//! reported by the native platform module. It supports:
//!
//! - Idle transactions that finish once their child spans go quiet
//! - Route and user interaction instrumentation
//! - Time to initial and full display, confirmed by native frame events
//! - Cold and warm app start attribution
//! - Slow and frozen frame counts
//! - Sampled profiling with JS and native profile merging
//! - Envelope batching with offline support
//!
//! # Native bridge
//!
//! Everything reported by the platform goes through [`NativeBridge`]. Each
//! call may fail or be unavailable, and every feature degrades to a local
//! fallback when it does. [`UnavailableBridge`] is the bridge used when no
//! native module is linked.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use performance::{RecordingSink, RouteContext, TracingClient, TracingOptions, UnavailableBridge};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let options = TracingOptions::new("app@1.0.0").with_routing_instrumentation(true);
//! let sink = Arc::new(RecordingSink::new());
//! let client = TracingClient::new(options, Arc::new(UnavailableBridge), Arc::clone(&sink));
//!
//! let (_native_tx, native_rx) = tokio::sync::broadcast::channel(16);
//! client.setup(native_rx).await;
//!
//! let route = client
//!     .integration()
//!     .on_route_will_change(RouteContext::new("Home"))
//!     .await
//!     .unwrap();
//! route.finish();
//!
//! client.wait_until_processed(1).await;
//! client.flush().await.unwrap();
//! assert_eq!(sink.envelopes().len(), 1);
//! # }
//! ```
//!
//! # Modules
//!
//! - [`client`] - High-level tracing client and envelope pipeline
//! - [`integration`] - Route, interaction and app state handling
//! - [`idle`] - Idle transactions and their timers
//! - [`frame_signal`] - Reconciles native frame events with a fallback
//! - [`time_to_display`] - Initial and full display spans
//! - [`app_start`] - App start attribution
//! - [`native_frames`] - Slow and frozen frame measurements
//! - [`profiler`] - Profile capture for transactions
//! - [`envelope`] - Envelopes and their wire format
//! - [`transport`] - Envelope batching and delivery

pub mod app_start;
pub mod client;
mod clock;
mod config;
pub mod envelope;
mod error;
pub mod frame_signal;
pub mod idle;
pub mod integration;
pub mod logging;
pub mod native;
pub mod native_frames;
pub mod profiler;
mod sampling;
pub mod scope;
pub mod span;
pub mod time_to_display;
pub mod transaction;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use app_start::{AppStartMetrics, APP_START_COLD, APP_START_WARM};
pub use client::TracingClient;
pub use clock::timestamp_in_seconds;
pub use config::TracingOptions;
pub use envelope::{Envelope, EnvelopeItem};
pub use error::{TracingError, TracingResult};
pub use frame_signal::{FrameSignal, FrameSignalReconciler};
pub use idle::{IdleTimeouts, IdleTransaction};
pub use integration::{AppState, RouteContext, TracingIntegration};
pub use logging::init_logging;
pub use native::{NativeAppStart, NativeBridge, NativeFrameEvent, NativeFrames, UnavailableBridge};
pub use native_frames::NativeFramesTracker;
pub use profiler::{CapturePhase, CaptureSummary, ProfilingEngine};
pub use sampling::Sampler;
pub use scope::Scope;
pub use span::{Measurement, Span, SpanStatus};
pub use time_to_display::{TIME_TO_FULL_DISPLAY, TIME_TO_INITIAL_DISPLAY};
pub use transaction::{Transaction, TransactionEvent};
pub use transport::{EnvelopeSink, EnvelopeTransport, RecordingSink, TransportConfig};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
