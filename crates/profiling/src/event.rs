//! Combined profile events and their enrichment with transaction context.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::profile::{nanos_serde, DebugMeta, Profile, ProfileMeasurement};

/// Version of the sampled profile format.
pub const PROFILE_FORMAT_VERSION: &str = "1";

/// Platform tag of profiles rooted in the JS engine.
pub const JAVASCRIPT_PLATFORM: &str = "javascript";

/// Platform tag of Android-wrapped profiles.
pub const ANDROID_PLATFORM: &str = "android";

/// Name of the JS runtime that produced the trace.
pub const JS_RUNTIME_NAME: &str = "hermes";

/// Runtime description attached to JS profiles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Runtime {
    pub name: String,
    pub version: String,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            name: JS_RUNTIME_NAME.to_string(),
            version: String::new(),
        }
    }
}

/// Transaction a profile belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileTransaction {
    pub name: String,
    pub id: String,
    pub trace_id: String,
    pub active_thread_id: String,
    #[serde(with = "nanos_serde")]
    pub relative_start_ns: u64,
    #[serde(with = "nanos_serde")]
    pub relative_end_ns: u64,
}

/// A JS profile, possibly with native CPU samples merged in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileEvent {
    /// Profile identifier
    pub event_id: String,
    pub version: String,
    pub platform: String,
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "DebugMeta::is_empty")]
    pub debug_meta: DebugMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub measurements: BTreeMap<String, ProfileMeasurement>,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<ProfileTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl ProfileEvent {
    /// Create a profile event for a converted JS profile.
    pub fn new(profile_id: impl Into<String>, profile: Profile) -> Self {
        Self {
            event_id: profile_id.into(),
            version: PROFILE_FORMAT_VERSION.to_string(),
            platform: JAVASCRIPT_PLATFORM.to_string(),
            profile,
            debug_meta: DebugMeta::default(),
            measurements: BTreeMap::new(),
            runtime: Runtime::default(),
            transaction: None,
            timestamp: None,
            release: None,
            environment: None,
        }
    }
}

/// An OS sampling profile wrapping the JS profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AndroidProfileEvent {
    /// Profile identifier
    pub profile_id: String,
    pub platform: String,
    pub sampled_profile: String,
    pub android_api_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    pub js_profile: Profile,
    #[serde(with = "nanos_serde")]
    pub duration_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// The merged artifact of one capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CombinedProfile {
    Js(ProfileEvent),
    Android(AndroidProfileEvent),
}

impl CombinedProfile {
    /// Profile identifier.
    pub fn profile_id(&self) -> &str {
        match self {
            CombinedProfile::Js(event) => &event.event_id,
            CombinedProfile::Android(event) => &event.profile_id,
        }
    }

    /// Platform tag.
    pub fn platform(&self) -> &str {
        match self {
            CombinedProfile::Js(event) => &event.platform,
            CombinedProfile::Android(event) => &event.platform,
        }
    }

    /// The JS half of the profile.
    pub fn js_profile(&self) -> &Profile {
        match self {
            CombinedProfile::Js(event) => &event.profile,
            CombinedProfile::Android(event) => &event.js_profile,
        }
    }
}

/// Context of the transaction a profile is being attached to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileEventContext {
    pub transaction_name: String,
    /// Event id of the transaction
    pub transaction_id: String,
    pub trace_id: String,
    /// Transaction start in seconds since the epoch
    pub start_timestamp: Option<f64>,
    pub release: Option<String>,
    pub environment: Option<String>,
}

/// A combined profile together with its capture window on the JS clock.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedProfile {
    pub profile: CombinedProfile,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl CapturedProfile {
    /// Duration of the capture window.
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    /// Fill in transaction context for sending.
    ///
    /// Returns `None` when the JS profile has no samples; such profiles are
    /// not worth sending.
    pub fn enrich(self, ctx: &ProfileEventContext) -> Option<CombinedProfile> {
        let duration_ns = self.duration_ns();
        let profile = self.profile;

        if profile.js_profile().is_empty() {
            tracing::debug!("Dropping profile {} without samples", profile.profile_id());
            return None;
        }

        if ctx.trace_id.len() != 32 {
            tracing::warn!(
                "Profile {} has an invalid trace id {:?}",
                profile.profile_id(),
                ctx.trace_id
            );
        }

        let timestamp = Some(iso_timestamp(ctx.start_timestamp));

        let enriched = match profile {
            CombinedProfile::Js(mut event) => {
                event.transaction = Some(ProfileTransaction {
                    name: ctx.transaction_name.clone(),
                    id: ctx.transaction_id.clone(),
                    trace_id: ctx.trace_id.clone(),
                    active_thread_id: event.profile.active_thread_id.clone().unwrap_or_default(),
                    relative_start_ns: 0,
                    relative_end_ns: duration_ns,
                });
                event.timestamp = timestamp;
                event.release = ctx.release.clone();
                event.environment = ctx.environment.clone();
                CombinedProfile::Js(event)
            }
            CombinedProfile::Android(mut event) => {
                event.transaction_name = Some(ctx.transaction_name.clone());
                event.transaction_id = Some(ctx.transaction_id.clone());
                event.trace_id = Some(ctx.trace_id.clone());
                event.timestamp = timestamp;
                event.release = ctx.release.clone();
                event.environment = ctx.environment.clone();
                CombinedProfile::Android(event)
            }
        };

        Some(enriched)
    }
}

fn iso_timestamp(seconds: Option<f64>) -> String {
    let datetime = seconds
        .filter(|s| s.is_finite())
        .and_then(|s| DateTime::<Utc>::from_timestamp_millis((s * 1000.0) as i64))
        .unwrap_or_else(Utc::now);
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}
