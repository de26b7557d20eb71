//! Error types for profile conversion and merging.

use thiserror::Error;

/// Errors that can occur while turning raw traces into profiles.
#[derive(Debug, Error)]
pub enum ProfilingError {
    /// The JS engine trace contained no samples
    #[error("Trace contains no samples")]
    EmptyTrace,

    /// The JS engine trace is malformed
    #[error("Invalid trace: {0}")]
    InvalidTrace(String),

    /// Failed to (de)serialize profile data
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for profiling operations.
pub type ProfilingResult<T> = Result<T, ProfilingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ProfilingError::EmptyTrace.to_string(), "Trace contains no samples");

        let err = ProfilingError::InvalidTrace("bad ts".to_string());
        assert_eq!(err.to_string(), "Invalid trace: bad ts");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: ProfilingError = json_err.into();
        assert!(matches!(err, ProfilingError::Serialization(_)));
    }
}
