//! Internal utility functions.
//!
//! Helpers for time conversion and pixel-row copying that are shared by the
//! generator, the converter, and the FFmpeg session.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before
/// running foreign code, so a poisoned lock still guards valid state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Round `seconds` onto a grid of `ticks_per_second`.
pub(crate) fn quantize_seconds(seconds: f64, ticks_per_second: u32) -> f64 {
    let scale = f64::from(ticks_per_second.max(1));
    (seconds * scale).round() / scale
}

/// Make a caller-supplied time usable as a seek target.
///
/// NaN and negative values become `0.0`. Returns the value and whether it
/// had to be changed.
pub(crate) fn sanitize_seconds(seconds: f64) -> (f64, bool) {
    if seconds.is_nan() || seconds < 0.0 {
        (0.0, true)
    } else {
        (seconds, false)
    }
}

/// Copy the first `row_bytes` of each row out of a strided plane into a
/// tightly-packed buffer.
///
/// Returns `None` if the plane is too short for `height` rows or the stride
/// is smaller than a row.
pub(crate) fn strip_stride(
    data: &[u8],
    stride: usize,
    row_bytes: usize,
    height: usize,
) -> Option<Vec<u8>> {
    if stride < row_bytes {
        return None;
    }
    if height == 0 {
        return Some(Vec::new());
    }
    let required = stride * (height - 1) + row_bytes;
    if data.len() < required {
        return None;
    }

    if stride == row_bytes {
        return Some(data[..row_bytes * height].to_vec());
    }

    let mut buffer = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let row_start = row * stride;
        buffer.extend_from_slice(&data[row_start..row_start + row_bytes]);
    }
    Some(buffer)
}

/// Convert seconds to a seek timestamp in AV_TIME_BASE (microseconds).
#[cfg(feature = "ffmpeg")]
pub(crate) fn seconds_to_seek_timestamp(seconds: f64) -> i64 {
    (seconds * 1_000_000.0) as i64
}

/// Rescale a PTS value from stream time base to seconds.
#[cfg(feature = "ffmpeg")]
pub(crate) fn pts_to_seconds(pts: i64, time_base: ffmpeg_next::Rational) -> f64 {
    pts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator())
}
