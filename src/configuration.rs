//! Generator configuration.
//!
//! [`GeneratorOptions`] is a builder that carries the timing knobs of the
//! seek-capture pipeline without growing the generator's constructor.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use thumbq::GeneratorOptions;
//!
//! let options = GeneratorOptions::new()
//!     .with_settle_delay(Duration::from_millis(150))
//!     .with_time_scale(1000);
//! assert_eq!(options.settled_time(1.2346), 1.235);
//! ```

use std::time::Duration;

use crate::utilities;

/// Pause between a finished seek and the frame capture.
///
/// Some decoders need a moment after a seek before the frame at the new
/// position can be read back reliably.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Ticks per second used to resolve requested times into settled times.
pub const DEFAULT_TIME_SCALE: u32 = 600;

/// Timing configuration for a [`ThumbnailGenerator`](crate::ThumbnailGenerator).
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorOptions {
    /// Delay between seek completion and frame capture.
    pub(crate) settle_delay: Duration,
    /// How far before the target the decoder may land, in seconds.
    pub(crate) tolerance_before: f64,
    /// How far after the target the decoder may land, in seconds.
    pub(crate) tolerance_after: f64,
    /// Ticks per second for time quantisation. Always at least 1.
    pub(crate) time_scale: u32,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorOptions {
    /// Create options with the default settle delay, zero seek tolerance,
    /// and a 600 ticks-per-second time scale.
    ///
    /// Requested times are seeked and reported at 1/600 s resolution. Use
    /// `with_time_scale(1)` to snap them to whole seconds instead.
    pub fn new() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            tolerance_before: 0.0,
            tolerance_after: 0.0,
            time_scale: DEFAULT_TIME_SCALE,
        }
    }

    /// Set the delay between a finished seek and the frame capture.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the seek tolerances in seconds. Negative values are treated as zero.
    #[must_use]
    pub fn with_tolerance(mut self, before: f64, after: f64) -> Self {
        self.tolerance_before = before.max(0.0);
        self.tolerance_after = after.max(0.0);
        self
    }

    /// Set the time scale used to resolve settled times. Clamped to a
    /// minimum of 1.
    #[must_use]
    pub fn with_time_scale(mut self, ticks_per_second: u32) -> Self {
        self.time_scale = ticks_per_second.max(1);
        self
    }

    /// The configured settle delay.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// The configured `(before, after)` seek tolerances in seconds.
    pub fn tolerance(&self) -> (f64, f64) {
        (self.tolerance_before, self.tolerance_after)
    }

    /// The configured time scale.
    pub fn time_scale(&self) -> u32 {
        self.time_scale
    }

    /// Resolve a requested time into the time that is actually seeked to and
    /// reported back.
    pub fn settled_time(&self, requested: f64) -> f64 {
        utilities::quantize_seconds(requested, self.time_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = GeneratorOptions::default();
        assert_eq!(options.settle_delay(), Duration::from_millis(300));
        assert_eq!(options.tolerance(), (0.0, 0.0));
        assert_eq!(options.time_scale(), 600);
    }

    #[test]
    fn time_scale_is_clamped() {
        let options = GeneratorOptions::new().with_time_scale(0);
        assert_eq!(options.time_scale(), 1);
        assert_eq!(options.settled_time(2.4), 2.0);
    }

    #[test]
    fn negative_tolerance_is_zeroed() {
        let options = GeneratorOptions::new().with_tolerance(-1.0, 0.5);
        assert_eq!(options.tolerance(), (0.0, 0.5));
    }
}
