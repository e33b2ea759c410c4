//! Result delivery.
//!
//! Every requested timestamp ends in exactly one [`ThumbnailResult`], which the
//! generator hands to its [`ThumbnailDelegate`] on the main context. The
//! generator keeps only a weak reference to the delegate; if the delegate has
//! been dropped by the time a result is delivered, the result is discarded.

use std::sync::mpsc::Sender;

use image::DynamicImage;

use crate::error::ThumbnailError;

/// Receives thumbnails and per-timestamp failures.
///
/// Both methods are invoked on the generator's main context. `time` is the
/// settled time that was seeked to, which may differ slightly from the
/// requested time.
pub trait ThumbnailDelegate: Send + Sync {
    /// A thumbnail was produced for `time`.
    fn on_thumbnail_generated(&self, image: DynamicImage, time: f64);

    /// No thumbnail could be produced for `time`.
    fn on_thumbnail_generation_failed(&self, error: ThumbnailError, time: f64);
}

/// The outcome for a single requested timestamp.
#[derive(Debug, Clone)]
pub enum ThumbnailResult {
    /// A thumbnail was produced.
    Generated {
        /// The converted frame.
        image: DynamicImage,
        /// Settled time in seconds.
        time: f64,
    },
    /// The timestamp was skipped.
    Failed {
        /// Why the thumbnail could not be produced.
        error: ThumbnailError,
        /// Settled time in seconds.
        time: f64,
    },
}

impl ThumbnailResult {
    /// Settled time in seconds.
    pub fn time(&self) -> f64 {
        match self {
            ThumbnailResult::Generated { time, .. } | ThumbnailResult::Failed { time, .. } => *time,
        }
    }

    /// Returns `true` for [`ThumbnailResult::Generated`].
    pub fn is_success(&self) -> bool {
        matches!(self, ThumbnailResult::Generated { .. })
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<ThumbnailError> {
        match self {
            ThumbnailResult::Failed { error, .. } => Some(*error),
            ThumbnailResult::Generated { .. } => None,
        }
    }

    /// The image, if one was produced.
    pub fn into_image(self) -> Option<DynamicImage> {
        match self {
            ThumbnailResult::Generated { image, .. } => Some(image),
            ThumbnailResult::Failed { .. } => None,
        }
    }

    /// Hand this result to the matching delegate callback.
    pub(crate) fn deliver_to(self, delegate: &dyn ThumbnailDelegate) {
        match self {
            ThumbnailResult::Generated { image, time } => {
                delegate.on_thumbnail_generated(image, time)
            }
            ThumbnailResult::Failed { error, time } => {
                delegate.on_thumbnail_generation_failed(error, time)
            }
        }
    }
}

/// A delegate that forwards every result into an `mpsc` channel.
///
/// Results sent after the receiver is gone are dropped.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, mpsc};
///
/// use thumbq::{ChannelDelegate, ThumbnailDelegate, ThumbnailError};
///
/// let (sender, receiver) = mpsc::channel();
/// let delegate = Arc::new(ChannelDelegate::new(sender));
/// delegate.on_thumbnail_generation_failed(ThumbnailError::SeekInterrupted, 4.0);
/// assert_eq!(receiver.recv().unwrap().time(), 4.0);
/// ```
#[derive(Debug)]
pub struct ChannelDelegate {
    sender: Sender<ThumbnailResult>,
}

impl ChannelDelegate {
    /// Wrap the sending half of a channel.
    pub fn new(sender: Sender<ThumbnailResult>) -> Self {
        Self { sender }
    }

    fn send(&self, result: ThumbnailResult) {
        if self.sender.send(result).is_err() {
            log::trace!("Thumbnail result receiver dropped");
        }
    }
}

impl ThumbnailDelegate for ChannelDelegate {
    fn on_thumbnail_generated(&self, image: DynamicImage, time: f64) {
        self.send(ThumbnailResult::Generated { image, time });
    }

    fn on_thumbnail_generation_failed(&self, error: ThumbnailError, time: f64) {
        self.send(ThumbnailResult::Failed { error, time });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn result_accessors() {
        let success = ThumbnailResult::Generated {
            image: DynamicImage::new_rgb8(1, 1),
            time: 1.5,
        };
        assert!(success.is_success());
        assert_eq!(success.time(), 1.5);
        assert_eq!(success.error(), None);
        assert!(success.into_image().is_some());

        let failure = ThumbnailResult::Failed {
            error: ThumbnailError::FrameCaptureFailed,
            time: 2.0,
        };
        assert!(!failure.is_success());
        assert_eq!(failure.error(), Some(ThumbnailError::FrameCaptureFailed));
        assert!(failure.into_image().is_none());
    }

    #[test]
    fn channel_delegate_tolerates_dropped_receiver() {
        let (sender, receiver) = mpsc::channel();
        let delegate = ChannelDelegate::new(sender);
        drop(receiver);
        delegate.on_thumbnail_generated(DynamicImage::new_rgb8(1, 1), 0.0);
    }
}
