//! Error types for the tracing runtime.
//!
//! None of these reach the host application: lifecycle entry points absorb
//! them and log through `tracing`.

use profiling::ProfilingError;
use thiserror::Error;

/// Errors that can occur while tracing and profiling.
#[derive(Debug, Error)]
pub enum TracingError {
    /// A native bridge call was rejected or the module is missing
    #[error("Native module unavailable: {0}")]
    NativeUnavailable(String),

    /// A raw profile could not be converted
    #[error("Profile conversion failed: {0}")]
    Profile(#[from] ProfilingError),

    /// A transaction referenced a profile that is not queued
    #[error("No queued profile with id {0}")]
    UnmatchedProfile(String),

    /// Failed to serialize an envelope
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to hand an envelope to the sink
    #[error("Transport error: {0}")]
    Transport(String),

    /// Envelope queue is full
    #[error("Envelope queue is full")]
    QueueFull,

    /// Transport is in offline mode
    #[error("Transport is offline")]
    Offline,
}

/// Result type for tracing operations.
pub type TracingResult<T> = Result<T, TracingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TracingError::NativeUnavailable("start_profiling".to_string());
        assert_eq!(err.to_string(), "Native module unavailable: start_profiling");

        let err = TracingError::UnmatchedProfile("abc".to_string());
        assert_eq!(err.to_string(), "No queued profile with id abc");
    }

    #[test]
    fn test_profiling_error_conversion() {
        let err: TracingError = ProfilingError::EmptyTrace.into();
        assert!(matches!(err, TracingError::Profile(ProfilingError::EmptyTrace)));
        assert_eq!(err.to_string(), "Profile conversion failed: Trace contains no samples");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<()>("invalid json").unwrap_err();
        let err: TracingError = json_err.into();
        assert!(matches!(err, TracingError::Serialization(_)));
    }
}
