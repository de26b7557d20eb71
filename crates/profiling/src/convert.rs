//! Conversion of a raw JS engine trace into the normalized profile format.

use regex_lite::Regex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{ProfilingError, ProfilingResult};
use crate::profile::{Frame, Profile, Sample, Stack, ThreadMetadata};
use crate::trace::{JsStackFrame, JsTrace, JAVASCRIPT_CATEGORY};

/// Thread name reported for JS engine threads.
pub const JS_THREAD_NAME: &str = "JavaScriptThread";

/// Thread priority reported for JS engine threads.
pub const JS_THREAD_PRIORITY: i32 = 1;

/// Function name used when a JavaScript frame has none.
pub const ANONYMOUS_FUNCTION: &str = "<anonymous>";

/// Convert a raw JS engine trace into a normalized profile.
///
/// Sample times are re-based on the first sample and converted from
/// microseconds to nanoseconds. The first sampled thread becomes the active
/// thread.
pub fn convert_js_trace(trace: &JsTrace) -> ProfilingResult<Profile> {
    let first = trace.samples.first().ok_or(ProfilingError::EmptyTrace)?;
    let start_us = parse_timestamp_us(&first.ts)?;

    // Frame ids are assigned in ascending raw id order, skipping the root.
    let mut frame_ids: HashMap<u64, usize> = HashMap::new();
    let mut frames = Vec::new();
    for (raw_id, raw_frame) in &trace.stack_frames {
        if raw_frame.is_root() {
            continue;
        }
        frame_ids.insert(*raw_id, frames.len());
        frames.push(parse_frame(raw_frame));
    }

    let mut stack_ids: HashMap<u64, usize> = HashMap::new();
    let mut stacks: Vec<Stack> = Vec::new();
    let mut samples = Vec::with_capacity(trace.samples.len());
    let mut profile = Profile::default();

    for raw in &trace.samples {
        let ts_us = parse_timestamp_us(&raw.ts)?;

        let stack_id = match stack_ids.entry(raw.sf) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let stack = build_stack(trace, &frame_ids, raw.sf)?;
                stacks.push(stack);
                *entry.insert(stacks.len() - 1)
            }
        };

        profile
            .thread_metadata
            .entry(raw.tid.clone())
            .or_insert_with(|| ThreadMetadata {
                name: Some(JS_THREAD_NAME.to_string()),
                priority: Some(JS_THREAD_PRIORITY),
            });

        samples.push(Sample::new(
            stack_id,
            raw.tid.clone(),
            ts_us.saturating_sub(start_us).saturating_mul(1_000),
        ));
    }

    profile.active_thread_id = Some(first.tid.clone());
    profile.samples = samples;
    profile.stacks = stacks;
    profile.frames = frames;
    Ok(profile)
}

/// Walk parent links from a leaf frame to the root.
fn build_stack(trace: &JsTrace, frame_ids: &HashMap<u64, usize>, leaf: u64) -> ProfilingResult<Stack> {
    if !trace.stack_frames.contains_key(&leaf) {
        return Err(ProfilingError::InvalidTrace(format!(
            "sample references unknown frame {leaf}"
        )));
    }

    let mut stack = Vec::new();
    let mut current = Some(leaf);
    let mut steps = 0;

    while let Some(raw_id) = current {
        steps += 1;
        if steps > trace.stack_frames.len() {
            return Err(ProfilingError::InvalidTrace(format!(
                "cycle in parent chain of frame {leaf}"
            )));
        }

        let Some(raw_frame) = trace.stack_frames.get(&raw_id) else {
            return Err(ProfilingError::InvalidTrace(format!(
                "frame {raw_id} has no entry in the frame table"
            )));
        };
        if let Some(frame_id) = frame_ids.get(&raw_id) {
            stack.push(*frame_id);
        }
        current = raw_frame.parent;
    }

    Ok(stack)
}

fn parse_timestamp_us(ts: &str) -> ProfilingResult<u64> {
    ts.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
        .ok_or_else(|| ProfilingError::InvalidTrace(format!("invalid sample timestamp {ts:?}")))
}

fn location_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?:(?P<func>[^(]*?)\s*\()?(?P<file>[^()]+):(?P<line>\d+):(?P<col>\d+)\)?$").ok()
        })
        .as_ref()
}

/// Parse a raw frame into a normalized frame.
///
/// JavaScript frames are named `function(file:line:col)`; everything else
/// keeps just its name.
pub fn parse_frame(raw: &JsStackFrame) -> Frame {
    if raw.category != JAVASCRIPT_CATEGORY {
        return Frame::function(raw.name.clone());
    }

    let explicit_line = raw.line.as_deref().and_then(|l| l.parse().ok());
    let explicit_col = raw.column.as_deref().and_then(|c| c.parse().ok());

    let captures = location_pattern().and_then(|re| re.captures(&raw.name));
    let Some(caps) = captures else {
        let function = if raw.name.is_empty() {
            ANONYMOUS_FUNCTION.to_string()
        } else {
            raw.name.clone()
        };
        return Frame {
            function: Some(function),
            lineno: explicit_line,
            colno: explicit_col,
            ..Default::default()
        };
    };

    let function = caps
        .name("func")
        .map(|m| m.as_str().trim())
        .filter(|f| !f.is_empty())
        .unwrap_or(ANONYMOUS_FUNCTION);

    Frame {
        function: Some(function.to_string()),
        file: caps.name("file").map(|m| m.as_str().to_string()),
        lineno: explicit_line.or_else(|| caps.name("line").and_then(|m| m.as_str().parse().ok())),
        colno: explicit_col.or_else(|| caps.name("col").and_then(|m| m.as_str().parse().ok())),
        ..Default::default()
    }
}
