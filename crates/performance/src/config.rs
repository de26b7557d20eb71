//! Tracing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options controlling transactions, profiling and display tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TracingOptions {
    /// Release identifier attached to events
    pub release: Option<String>,
    /// Environment attached to events
    pub environment: Option<String>,
    /// Log through `tracing` at debug level
    pub debug: bool,
    /// Probability that a transaction is sampled, `None` disables tracing
    pub traces_sample_rate: Option<f64>,
    /// Probability that a sampled transaction is profiled, `None` disables profiling
    pub profiles_sample_rate: Option<f64>,
    /// Finish an idle transaction after this long without open child spans
    pub idle_timeout_ms: u64,
    /// Hard cap on transaction duration, `0` disables it
    pub final_timeout_ms: u64,
    /// Wait before falling back when no native frame event confirms a display
    pub frame_fallback_delay_ms: u64,
    /// Hard stop for a profiling session
    pub max_profile_duration_ms: u64,
    /// Number of finished profiles kept until their transaction is sent
    pub profile_queue_capacity: usize,
    /// App starts at least this long are discarded as outliers
    pub app_start_max_duration_ms: u64,
    /// Attach app start data to the first transaction
    pub enable_app_start_tracking: bool,
    /// Record slow and frozen frame counts on transactions
    pub enable_native_frames_tracking: bool,
    /// Create transactions for user interactions
    pub enable_user_interaction_tracing: bool,
    /// Drop transactions for revisited routes that recorded nothing meaningful
    pub ignore_empty_back_navigation_transactions: bool,
    /// A routing instrumentation reports route changes
    pub routing_instrumentation: bool,
    /// Maximum envelopes buffered by the transport
    pub max_queued_envelopes: usize,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            release: None,
            environment: None,
            debug: false,
            traces_sample_rate: Some(1.0),
            profiles_sample_rate: None,
            idle_timeout_ms: 1_000,
            final_timeout_ms: 600_000,
            frame_fallback_delay_ms: 3_000,
            max_profile_duration_ms: 30_000,
            profile_queue_capacity: profiling::DEFAULT_PROFILE_QUEUE_CAPACITY,
            app_start_max_duration_ms: 60_000,
            enable_app_start_tracking: true,
            enable_native_frames_tracking: true,
            enable_user_interaction_tracing: false,
            ignore_empty_back_navigation_transactions: true,
            routing_instrumentation: false,
            max_queued_envelopes: 100,
        }
    }
}

impl TracingOptions {
    /// Create options for the given release.
    pub fn new(release: &str) -> Self {
        Self {
            release: Some(release.to_string()),
            ..Default::default()
        }
    }

    /// Parse options from JSON, falling back to defaults on malformed input.
    pub fn from_json_str(json: &str) -> Self {
        match serde_json::from_str::<TracingOptions>(json) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!("Failed to parse tracing options, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Set the environment.
    pub fn with_environment(mut self, environment: &str) -> Self {
        self.environment = Some(environment.to_string());
        self
    }

    /// Enable debug logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the transaction sample rate.
    pub fn with_traces_sample_rate(mut self, rate: Option<f64>) -> Self {
        self.traces_sample_rate = rate;
        self
    }

    /// Set the profile sample rate.
    pub fn with_profiles_sample_rate(mut self, rate: Option<f64>) -> Self {
        self.profiles_sample_rate = rate;
        self
    }

    /// Set the idle timeout in milliseconds.
    pub fn with_idle_timeout_ms(mut self, timeout: u64) -> Self {
        self.idle_timeout_ms = timeout;
        self
    }

    /// Set the final timeout in milliseconds, `0` disables it.
    pub fn with_final_timeout_ms(mut self, timeout: u64) -> Self {
        self.final_timeout_ms = timeout;
        self
    }

    /// Set the frame signal fallback delay in milliseconds.
    pub fn with_frame_fallback_delay_ms(mut self, delay: u64) -> Self {
        self.frame_fallback_delay_ms = delay;
        self
    }

    /// Set the profile hard stop in milliseconds.
    pub fn with_max_profile_duration_ms(mut self, duration: u64) -> Self {
        self.max_profile_duration_ms = duration;
        self
    }

    /// Set the profile queue capacity.
    pub fn with_profile_queue_capacity(mut self, capacity: usize) -> Self {
        self.profile_queue_capacity = capacity;
        self
    }

    /// Enable or disable app start tracking.
    pub fn with_app_start_tracking(mut self, enabled: bool) -> Self {
        self.enable_app_start_tracking = enabled;
        self
    }

    /// Enable or disable native frame tracking.
    pub fn with_native_frames_tracking(mut self, enabled: bool) -> Self {
        self.enable_native_frames_tracking = enabled;
        self
    }

    /// Enable or disable user interaction tracing.
    pub fn with_user_interaction_tracing(mut self, enabled: bool) -> Self {
        self.enable_user_interaction_tracing = enabled;
        self
    }

    /// Enable or disable dropping of empty back navigations.
    pub fn with_ignore_empty_back_navigation(mut self, enabled: bool) -> Self {
        self.ignore_empty_back_navigation_transactions = enabled;
        self
    }

    /// Declare that a routing instrumentation is present.
    pub fn with_routing_instrumentation(mut self, enabled: bool) -> Self {
        self.routing_instrumentation = enabled;
        self
    }

    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Final timeout as a duration, `None` when disabled.
    pub fn final_timeout(&self) -> Option<Duration> {
        (self.final_timeout_ms > 0).then(|| Duration::from_millis(self.final_timeout_ms))
    }

    /// Frame signal fallback delay as a duration.
    pub fn frame_fallback_delay(&self) -> Duration {
        Duration::from_millis(self.frame_fallback_delay_ms)
    }

    /// Profile hard stop as a duration.
    pub fn max_profile_duration(&self) -> Duration {
        Duration::from_millis(self.max_profile_duration_ms)
    }
}
