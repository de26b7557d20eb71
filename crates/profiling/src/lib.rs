//! Cross-runtime Profiles
//!
//! Data layer for combining a JS engine CPU trace with native profiling data
//! into a single profile event:
//!
//! - Conversion of the raw JS engine trace into an index-addressed profile
//! - Merging of a native CPU profile (frame/stack index remapping, JS thread
//!   de-duplication) or wrapping in an Android sampling profile
//! - Alignment of the native monotonic clock with the JS clock
//! - A bounded queue holding finished profiles until their transaction is sent
//! - Enrichment of a profile with the context of its transaction
//!
//! # Example
//!
//! ```rust
//! use profiling::{convert_js_trace, combine, JsStackFrame, JsTrace, MergeContext};
//!
//! let trace = JsTrace::new()
//!     .with_frame(1, JsStackFrame::root())
//!     .with_frame(2, JsStackFrame::javascript("App(app.js:1:1)", Some(1)))
//!     .with_sample("14", 100, 2)
//!     .with_sample("14", 110, 2);
//!
//! let profile = convert_js_trace(&trace).unwrap();
//! let ctx = MergeContext { start_ns: 0, end_ns: 10_000, alignment: None };
//! let combined = combine("profile-id", profile, None, &ctx);
//! assert_eq!(combined.js_profile().samples.len(), 2);
//! ```

pub mod clock;
pub mod convert;
mod error;
pub mod event;
pub mod merge;
pub mod native;
pub mod profile;
pub mod queue;
pub mod trace;

pub use clock::ClockAlignment;
pub use convert::convert_js_trace;
pub use error::{ProfilingError, ProfilingResult};
pub use event::{
    AndroidProfileEvent, CapturedProfile, CombinedProfile, ProfileEvent, ProfileEventContext,
    ProfileTransaction,
};
pub use merge::{combine, merge_native_profile, MergeContext};
pub use native::{AndroidProfile, NativeCpuProfile, PlatformProfile, RawProfiles};
pub use profile::{DebugImage, DebugMeta, Frame, Profile, ProfileMeasurement, Sample, ThreadMetadata};
pub use queue::{ProfileQueue, DEFAULT_PROFILE_QUEUE_CAPACITY};
pub use trace::{JsSample, JsStackFrame, JsTrace};
