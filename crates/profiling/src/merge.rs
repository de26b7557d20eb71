//! Merging of JS and native profiles into one combined profile.
//!
//! Frames and stacks of the two sources are independently indexed, so
//! native data is appended with its indices shifted past the JS data.

use crate::clock::{shift_offset, ClockAlignment};
use crate::event::{AndroidProfileEvent, CombinedProfile, ProfileEvent, ANDROID_PLATFORM};
use crate::native::{AndroidProfile, NativeCpuProfile, PlatformProfile};
use crate::profile::Profile;

/// Capture window and clock information needed to merge a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeContext {
    /// Capture start on the JS clock
    pub start_ns: u64,
    /// Capture end on the JS clock
    pub end_ns: u64,
    /// Native to JS clock alignment, if known
    pub alignment: Option<ClockAlignment>,
}

impl MergeContext {
    /// Duration of the capture window.
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Append a native profile to a JS profile.
///
/// Native stack frame ids are offset by the number of JS frames, native
/// sample stack ids by the number of JS stacks. Native samples taken on the
/// active JS thread are dropped since the JS trace already covers them.
/// `shift_ns` is added to every native sample offset.
pub fn merge_native_profile(js: &mut Profile, native: &Profile, shift_ns: i128) {
    let frames_offset = js.frames.len();
    let stacks_offset = js.stacks.len();

    js.frames.extend(native.frames.iter().cloned());
    js.stacks.extend(
        native
            .stacks
            .iter()
            .map(|stack| stack.iter().map(|frame_id| frame_id + frames_offset).collect()),
    );

    let active_thread = js.active_thread_id.clone();
    let native_samples = native
        .samples
        .iter()
        .filter(|sample| active_thread.as_deref() != Some(sample.thread_id.as_str()))
        .map(|sample| {
            let mut sample = sample.clone();
            sample.stack_id += stacks_offset;
            sample.elapsed_since_start_ns = shift_offset(sample.elapsed_since_start_ns, shift_ns);
            sample
        });
    js.samples.extend(native_samples);

    // Thread and queue ids are assumed unique across runtimes; JS entries win.
    for (thread_id, meta) in &native.thread_metadata {
        js.thread_metadata
            .entry(thread_id.clone())
            .or_insert_with(|| meta.clone());
    }
    for (address, meta) in &native.queue_metadata {
        js.queue_metadata
            .entry(address.clone())
            .or_insert_with(|| meta.clone());
    }
}

/// Fold a native CPU profile into a JS profile event.
pub fn add_native_cpu_profile(event: &mut ProfileEvent, native: NativeCpuProfile, ctx: &MergeContext) {
    let shift_ns = match (native.profile_start_timestamp_ns, ctx.alignment) {
        (Some(native_start), Some(alignment)) => alignment.rebase_shift_ns(native_start, ctx.start_ns),
        _ => 0,
    };

    merge_native_profile(&mut event.profile, &native.profile, shift_ns);
    event.debug_meta.images.extend(native.debug_meta.images);
    event.measurements.extend(native.measurements);
}

/// Wrap a JS profile inside an Android sampling profile.
pub fn wrap_in_android_profile(
    profile_id: impl Into<String>,
    js: Profile,
    android: AndroidProfile,
    duration_ns: u64,
) -> AndroidProfileEvent {
    AndroidProfileEvent {
        profile_id: profile_id.into(),
        platform: ANDROID_PLATFORM.to_string(),
        sampled_profile: android.sampled_profile,
        android_api_level: android.android_api_level,
        build_id: android.build_id,
        active_thread_id: js.active_thread_id.clone(),
        js_profile: js,
        duration_ns,
        transaction_name: None,
        transaction_id: None,
        trace_id: None,
        timestamp: None,
        release: None,
        environment: None,
    }
}

/// Combine a converted JS profile with the optional platform profile.
pub fn combine(
    profile_id: &str,
    js: Profile,
    platform: Option<PlatformProfile>,
    ctx: &MergeContext,
) -> CombinedProfile {
    match platform {
        None => CombinedProfile::Js(ProfileEvent::new(profile_id, js)),
        Some(PlatformProfile::NativeCpu(native)) => {
            let mut event = ProfileEvent::new(profile_id, js);
            add_native_cpu_profile(&mut event, native, ctx);
            CombinedProfile::Js(event)
        }
        Some(PlatformProfile::Android(android)) => {
            CombinedProfile::Android(wrap_in_android_profile(profile_id, js, android, ctx.duration_ns()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{DebugImage, Frame, QueueMetadata, Sample, ThreadMetadata};
    use proptest::prelude::*;

    fn js_profile() -> Profile {
        let mut profile = Profile {
            samples: vec![Sample::new(0, "14", 0), Sample::new(1, "14", 10_000)],
            stacks: vec![vec![0], vec![1, 0]],
            frames: vec![Frame::function("App"), Frame::function("render")],
            active_thread_id: Some("14".to_string()),
            ..Default::default()
        };
        profile.thread_metadata.insert(
            "14".to_string(),
            ThreadMetadata {
                name: Some("JavaScriptThread".to_string()),
                priority: Some(1),
            },
        );
        profile
    }

    fn native_profile() -> Profile {
        let mut profile = Profile {
            samples: vec![
                Sample::new(0, "259", 5_000),
                Sample::new(1, "14", 6_000),
                Sample::new(1, "260", 7_000),
            ],
            stacks: vec![vec![0], vec![2, 1, 0]],
            frames: vec![
                Frame::function("main"),
                Frame::function("UIApplicationMain"),
                Frame::function("CFRunLoopRun"),
            ],
            ..Default::default()
        };
        profile.thread_metadata.insert(
            "14".to_string(),
            ThreadMetadata {
                name: Some("com.facebook.react.JavaScript".to_string()),
                priority: Some(31),
            },
        );
        profile.thread_metadata.insert(
            "259".to_string(),
            ThreadMetadata {
                name: Some("main".to_string()),
                priority: Some(31),
            },
        );
        profile.queue_metadata.insert(
            "0x1".to_string(),
            QueueMetadata {
                label: "com.apple.main-thread".to_string(),
            },
        );
        profile
    }

    #[test]
    fn test_merge_offsets_frames_and_stacks() {
        let mut js = js_profile();
        merge_native_profile(&mut js, &native_profile(), 0);

        assert_eq!(js.frames.len(), 5);
        assert_eq!(js.frames[2].function.as_deref(), Some("main"));
        assert_eq!(js.stacks, vec![vec![0], vec![1, 0], vec![2], vec![4, 3, 2]]);
    }

    #[test]
    fn test_merge_drops_samples_on_js_thread() {
        let mut js = js_profile();
        merge_native_profile(&mut js, &native_profile(), 0);

        assert_eq!(js.samples.len(), 4);
        let native: Vec<(&str, usize)> = js.samples[2..]
            .iter()
            .map(|s| (s.thread_id.as_str(), s.stack_id))
            .collect();
        assert_eq!(native, vec![("259", 2), ("260", 3)]);
    }

    #[test]
    fn test_merge_thread_metadata_js_wins() {
        let mut js = js_profile();
        merge_native_profile(&mut js, &native_profile(), 0);

        assert_eq!(js.thread_metadata["14"].name.as_deref(), Some("JavaScriptThread"));
        assert_eq!(js.thread_metadata["259"].name.as_deref(), Some("main"));
        assert_eq!(js.queue_metadata["0x1"].label, "com.apple.main-thread");
    }

    #[test]
    fn test_merge_applies_shift() {
        let mut js = js_profile();
        merge_native_profile(&mut js, &native_profile(), -6_000);

        let offsets: Vec<u64> = js.samples[2..].iter().map(|s| s.elapsed_since_start_ns).collect();
        assert_eq!(offsets, vec![0, 1_000]);
    }

    #[test]
    fn test_combine_without_platform() {
        let ctx = MergeContext {
            start_ns: 0,
            end_ns: 100,
            alignment: None,
        };
        let combined = combine("p1", js_profile(), None, &ctx);
        assert_eq!(combined.profile_id(), "p1");
        assert_eq!(combined.js_profile().frames.len(), 2);
    }

    #[test]
    fn test_combine_native_cpu_profile() {
        let native = NativeCpuProfile {
            profile: native_profile(),
            profile_start_timestamp_ns: Some(2_000),
            debug_meta: crate::profile::DebugMeta {
                images: vec![DebugImage {
                    image_type: "macho".to_string(),
                    debug_id: "uuid".to_string(),
                    code_file: Some("App".to_string()),
                    image_addr: Some("0x100".to_string()),
                    image_size: Some(4096),
                }],
            },
            measurements: Default::default(),
        };
        // Native clock runs 1000ns behind the JS clock.
        let ctx = MergeContext {
            start_ns: 2_000,
            end_ns: 50_000,
            alignment: Some(ClockAlignment::from_readings(10_000, 9_000)),
        };

        let CombinedProfile::Js(event) = combine("p1", js_profile(), Some(PlatformProfile::NativeCpu(native)), &ctx)
        else {
            panic!("expected js profile");
        };

        assert_eq!(event.debug_meta.images.len(), 1);
        // Native start 2000 maps to 3000 on the JS clock, 1000ns after the capture start.
        assert_eq!(event.profile.samples[2].elapsed_since_start_ns, 6_000);
    }

    #[test]
    fn test_combine_android_profile() {
        let android = AndroidProfile {
            sampled_profile: "blob".to_string(),
            android_api_level: 33,
            build_id: Some("build".to_string()),
        };
        let ctx = MergeContext {
            start_ns: 1_000,
            end_ns: 31_000,
            alignment: None,
        };

        let CombinedProfile::Android(event) =
            combine("p2", js_profile(), Some(PlatformProfile::Android(android)), &ctx)
        else {
            panic!("expected android profile");
        };

        assert_eq!(event.platform, ANDROID_PLATFORM);
        assert_eq!(event.duration_ns, 30_000);
        assert_eq!(event.active_thread_id.as_deref(), Some("14"));
        assert_eq!(event.js_profile.samples.len(), 2);
    }

    fn arb_profile(thread: &'static str) -> impl Strategy<Value = Profile> {
        (1usize..20, 1usize..10).prop_flat_map(move |(frame_count, stack_count)| {
            (
                prop::collection::vec(prop::collection::vec(0..frame_count, 1..6), stack_count),
                prop::collection::vec(0..stack_count, 0..20),
            )
                .prop_map(move |(stacks, sample_stacks)| Profile {
                    frames: (0..frame_count).map(|i| Frame::function(format!("f{i}"))).collect(),
                    stacks,
                    samples: sample_stacks
                        .into_iter()
                        .enumerate()
                        .map(|(i, stack_id)| Sample::new(stack_id, thread, i as u64 * 1_000))
                        .collect(),
                    active_thread_id: Some(thread.to_string()),
                    ..Default::default()
                })
        })
    }

    proptest! {
        #[test]
        fn prop_merge_shifts_native_frame_ids(js in arb_profile("1"), native in arb_profile("2")) {
            let js_frames = js.frames.len();
            let js_stacks = js.stacks.len();
            let mut merged = js.clone();
            merge_native_profile(&mut merged, &native, 0);

            prop_assert_eq!(merged.frames.len(), js_frames + native.frames.len());
            prop_assert_eq!(merged.stacks.len(), js_stacks + native.stacks.len());
            for (merged_stack, native_stack) in merged.stacks[js_stacks..].iter().zip(&native.stacks) {
                for (merged_id, native_id) in merged_stack.iter().zip(native_stack) {
                    prop_assert_eq!(*merged_id, native_id + js_frames);
                }
            }
            for sample in &merged.samples[js.samples.len()..] {
                prop_assert!(sample.stack_id >= js_stacks);
                prop_assert!(sample.stack_id < merged.stacks.len());
            }
        }
    }
}
