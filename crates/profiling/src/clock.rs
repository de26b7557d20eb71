//! Alignment between the JS-side wall clock and the native monotonic clock.
//!
//! The two runtimes share no clock. A single pair of readings taken back to
//! back gives the offset between them. It is computed once and reused for
//! every conversion.

use serde::{Deserialize, Serialize};

/// Offset that maps native monotonic nanoseconds onto JS wall-clock nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockAlignment {
    offset_ns: i128,
}

impl ClockAlignment {
    /// Compute the alignment from two readings taken at (approximately) the same instant.
    pub fn from_readings(js_now_ns: u64, native_now_ns: u64) -> Self {
        Self {
            offset_ns: i128::from(js_now_ns) - i128::from(native_now_ns),
        }
    }

    /// An alignment for clocks that already agree.
    pub fn identity() -> Self {
        Self { offset_ns: 0 }
    }

    /// Signed offset in nanoseconds (`js - native`).
    pub fn offset_ns(&self) -> i128 {
        self.offset_ns
    }

    /// Convert a native monotonic reading to the JS clock, saturating at zero.
    pub fn native_to_js(&self, native_ns: u64) -> u64 {
        clamp_to_u64(i128::from(native_ns) + self.offset_ns)
    }

    /// Convert a JS clock reading to the native clock, saturating at zero.
    pub fn js_to_native(&self, js_ns: u64) -> u64 {
        clamp_to_u64(i128::from(js_ns) - self.offset_ns)
    }

    /// Shift needed to re-base offsets measured from `native_start_ns`
    /// onto offsets measured from `js_start_ns`.
    pub fn rebase_shift_ns(&self, native_start_ns: u64, js_start_ns: u64) -> i128 {
        i128::from(self.native_to_js(native_start_ns)) - i128::from(js_start_ns)
    }
}

impl Default for ClockAlignment {
    fn default() -> Self {
        Self::identity()
    }
}

fn clamp_to_u64(value: i128) -> u64 {
    value.clamp(0, i128::from(u64::MAX)) as u64
}

/// Apply a signed shift to an offset, saturating at zero.
pub fn shift_offset(elapsed_ns: u64, shift_ns: i128) -> u64 {
    clamp_to_u64(i128::from(elapsed_ns) + shift_ns)
}
