//! Platform profile shapes delivered next to the JS engine trace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::profile::{DebugMeta, Profile, ProfileMeasurement};
use crate::trace::JsTrace;

/// Native thread CPU profile in the normalized format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NativeCpuProfile {
    pub profile: Profile,
    /// Profile start on the native monotonic clock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_start_timestamp_ns: Option<u64>,
    #[serde(default)]
    pub debug_meta: DebugMeta,
    #[serde(default)]
    pub measurements: BTreeMap<String, ProfileMeasurement>,
}

/// Opaque OS sampling profile, shipped as an encoded blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AndroidProfile {
    /// Encoded trace file
    pub sampled_profile: String,
    pub android_api_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

/// The platform-specific half of a capture.
///
/// The variant decides the merge path: CPU profiles are folded into the JS
/// profile, Android profiles wrap it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformProfile {
    NativeCpu(NativeCpuProfile),
    Android(AndroidProfile),
}

impl PlatformProfile {
    /// Platform tag reported for the combined profile.
    pub fn platform(&self) -> &'static str {
        match self {
            PlatformProfile::NativeCpu(_) => "javascript",
            PlatformProfile::Android(_) => "android",
        }
    }
}

/// Everything the native side returns when profiling stops.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawProfiles {
    pub js_trace: JsTrace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformProfile>,
}

impl RawProfiles {
    /// Raw profiles with only a JS trace.
    pub fn js_only(js_trace: JsTrace) -> Self {
        Self {
            js_trace,
            platform: None,
        }
    }

    /// Attach a platform profile.
    pub fn with_platform(mut self, platform: PlatformProfile) -> Self {
        self.platform = Some(platform);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_profile_tagging() {
        let android = PlatformProfile::Android(AndroidProfile {
            sampled_profile: "blob".to_string(),
            android_api_level: 33,
            build_id: None,
        });

        let json = serde_json::to_value(&android).unwrap();
        assert_eq!(json["type"], "android");
        assert_eq!(json["android_api_level"], 33);

        let back: PlatformProfile = serde_json::from_value(json).unwrap();
        assert_eq!(back, android);
        assert_eq!(back.platform(), "android");
    }

    #[test]
    fn test_native_cpu_profile_defaults() {
        let json = r#"{"type": "native_cpu", "profile": {"samples": [], "stacks": [], "frames": []}}"#;
        let parsed: PlatformProfile = serde_json::from_str(json).unwrap();

        match parsed {
            PlatformProfile::NativeCpu(native) => {
                assert!(native.debug_meta.is_empty());
                assert!(native.measurements.is_empty());
                assert!(native.profile_start_timestamp_ns.is_none());
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }
}
