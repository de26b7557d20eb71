//! Normalized sampled profile format.
//!
//! Frames and stacks are index-addressed: a stack is a list of frame
//! indices (leaf first) and a sample points at a stack index. Both the JS
//! engine trace and native CPU profiles are brought into this shape before
//! they are merged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stack is a list of frame indices, leaf first.
pub type Stack = Vec<usize>;

/// A single resolved frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl Frame {
    /// Create a frame with only a function name.
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            function: Some(name.into()),
            ..Default::default()
        }
    }
}

/// A single sample pointing at a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub stack_id: usize,
    pub thread_id: String,
    /// Time since the profile start
    #[serde(with = "nanos_serde")]
    pub elapsed_since_start_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_address: Option<String>,
}

impl Sample {
    /// Create a sample.
    pub fn new(stack_id: usize, thread_id: impl Into<String>, elapsed_since_start_ns: u64) -> Self {
        Self {
            stack_id,
            thread_id: thread_id.into(),
            elapsed_since_start_ns,
            queue_address: None,
        }
    }
}

/// Metadata describing a sampled thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThreadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// Metadata describing a dispatch queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueMetadata {
    pub label: String,
}

/// A sampled profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub samples: Vec<Sample>,
    pub stacks: Vec<Stack>,
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub thread_metadata: BTreeMap<String, ThreadMetadata>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub queue_metadata: BTreeMap<String, QueueMetadata>,
    /// Thread the JS engine ran on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_thread_id: Option<String>,
}

impl Profile {
    /// Number of frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of stacks.
    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    /// Check if the profile has no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest sample offset, i.e. the sampled span of the profile.
    pub fn sampled_duration_ns(&self) -> u64 {
        self.samples
            .iter()
            .map(|s| s.elapsed_since_start_ns)
            .max()
            .unwrap_or(0)
    }
}

/// Binary images referenced by native frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebugMeta {
    #[serde(default)]
    pub images: Vec<DebugImage>,
}

impl DebugMeta {
    /// Check if there are no images.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// A single loaded binary image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugImage {
    #[serde(rename = "type")]
    pub image_type: String,
    pub debug_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u64>,
}

/// A time series recorded alongside a profile (e.g. frame renders).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileMeasurement {
    pub unit: String,
    pub values: Vec<MeasurementValue>,
}

/// One point of a [`ProfileMeasurement`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementValue {
    #[serde(with = "nanos_serde")]
    pub elapsed_since_start_ns: u64,
    pub value: f64,
}

// =============================================================================
// Serde helpers for nanosecond offsets
// =============================================================================

/// Nanosecond offsets travel as decimal strings; numbers are accepted too.
pub(crate) mod nanos_serde {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(nanos: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&nanos.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(n),
        }
    }
}
