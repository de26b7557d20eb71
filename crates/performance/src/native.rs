//! Boundary to the native platform module.
//!
//! Every call is an async round trip across the bridge. Failures come back
//! as `None`, `false` or an error and always degrade to a local fallback.

use profiling::RawProfiles;
use serde::{Deserialize, Serialize};

use crate::error::{TracingError, TracingResult};

/// App start as recorded by the native side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NativeAppStart {
    /// App start in milliseconds since the epoch
    pub app_start_time: f64,
    pub is_cold_start: bool,
    /// The app start was already reported once
    pub did_fetch_app_start: bool,
}

/// Cumulative frame counters kept by the native side.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NativeFrames {
    pub total_frames: u64,
    pub slow_frames: u64,
    pub frozen_frames: u64,
}

/// Broadcast by the native side when a new frame was drawn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NativeFrameEvent {
    pub new_frame_timestamp_in_seconds: f64,
}

/// Native module calls consumed by the tracing core.
#[trait_variant::make(Send)]
pub trait NativeBridge: Send + Sync + 'static {
    /// Start the native profilers. Returns `false` if they did not start.
    async fn start_profiling(&self) -> bool;

    /// Stop the native profilers and collect what they recorded.
    async fn stop_profiling(&self) -> Option<RawProfiles>;

    /// Current reading of the native monotonic clock.
    fn native_clock_ns(&self) -> Option<u64>;

    /// Timestamp in seconds of the next frame drawn for a new screen.
    async fn get_new_screen_time_to_display(&self) -> TracingResult<Option<f64>>;

    /// App start timestamp and cold/warm classification.
    async fn fetch_native_app_start(&self) -> Option<NativeAppStart>;

    /// Current cumulative frame counters.
    async fn fetch_native_frames(&self) -> Option<NativeFrames>;

    /// Enable or disable native frame tracking.
    fn enable_native_frames_tracking(&self, enabled: bool);
}

/// Bridge used when no native module is linked.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBridge;

impl NativeBridge for UnavailableBridge {
    async fn start_profiling(&self) -> bool {
        false
    }

    async fn stop_profiling(&self) -> Option<RawProfiles> {
        None
    }

    fn native_clock_ns(&self) -> Option<u64> {
        None
    }

    async fn get_new_screen_time_to_display(&self) -> TracingResult<Option<f64>> {
        Err(TracingError::NativeUnavailable(
            "get_new_screen_time_to_display".to_string(),
        ))
    }

    async fn fetch_native_app_start(&self) -> Option<NativeAppStart> {
        None
    }

    async fn fetch_native_frames(&self) -> Option<NativeFrames> {
        None
    }

    fn enable_native_frames_tracking(&self, _enabled: bool) {}
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// How the mock answers a screen time request.
    #[derive(Debug, Clone, Copy)]
    pub enum ScreenTime {
        Value(f64),
        Missing,
        Reject,
    }

    /// Scriptable bridge for unit tests.
    #[derive(Debug)]
    pub struct MockBridge {
        pub start_result: AtomicBool,
        pub start_calls: AtomicUsize,
        pub stop_calls: AtomicUsize,
        pub stop_result: Mutex<Option<RawProfiles>>,
        pub clock_ns: Mutex<Option<u64>>,
        pub screen_time: Mutex<ScreenTime>,
        pub screen_time_delay: Mutex<Duration>,
        pub app_start: Mutex<Option<NativeAppStart>>,
        pub frames: Mutex<Option<NativeFrames>>,
        pub frames_tracking: Mutex<Option<bool>>,
    }

    impl Default for MockBridge {
        fn default() -> Self {
            Self {
                start_result: AtomicBool::new(true),
                start_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
                stop_result: Mutex::new(None),
                clock_ns: Mutex::new(None),
                screen_time: Mutex::new(ScreenTime::Missing),
                screen_time_delay: Mutex::new(Duration::ZERO),
                app_start: Mutex::new(None),
                frames: Mutex::new(None),
                frames_tracking: Mutex::new(None),
            }
        }
    }

    impl MockBridge {
        pub fn set_stop_result(&self, profiles: Option<RawProfiles>) {
            *self.stop_result.lock().unwrap() = profiles;
        }

        pub fn set_screen_time(&self, answer: ScreenTime, delay: Duration) {
            *self.screen_time.lock().unwrap() = answer;
            *self.screen_time_delay.lock().unwrap() = delay;
        }

        pub fn set_app_start(&self, app_start: Option<NativeAppStart>) {
            *self.app_start.lock().unwrap() = app_start;
        }

        pub fn set_frames(&self, frames: Option<NativeFrames>) {
            *self.frames.lock().unwrap() = frames;
        }
    }

    impl NativeBridge for MockBridge {
        async fn start_profiling(&self) -> bool {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.start_result.load(Ordering::SeqCst)
        }

        async fn stop_profiling(&self) -> Option<RawProfiles> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stop_result.lock().unwrap().clone()
        }

        fn native_clock_ns(&self) -> Option<u64> {
            *self.clock_ns.lock().unwrap()
        }

        async fn get_new_screen_time_to_display(&self) -> TracingResult<Option<f64>> {
            let delay = *self.screen_time_delay.lock().unwrap();
            let answer = *self.screen_time.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match answer {
                ScreenTime::Value(ts) => Ok(Some(ts)),
                ScreenTime::Missing => Ok(None),
                ScreenTime::Reject => Err(TracingError::NativeUnavailable("rejected".to_string())),
            }
        }

        async fn fetch_native_app_start(&self) -> Option<NativeAppStart> {
            *self.app_start.lock().unwrap()
        }

        async fn fetch_native_frames(&self) -> Option<NativeFrames> {
            *self.frames.lock().unwrap()
        }

        fn enable_native_frames_tracking(&self, enabled: bool) {
            *self.frames_tracking.lock().unwrap() = Some(enabled);
        }
    }
}
