//! Error types for the `thumbq` crate.
//!
//! Two kinds of failure exist. [`ThumbnailError`] is the closed set of
//! per-timestamp outcomes delivered to a
//! [`ThumbnailDelegate`](crate::ThumbnailDelegate); none of them stops the
//! pipeline. [`ThumbqError`] is returned by fallible setup calls such as
//! opening a video file.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

/// Why a single requested thumbnail could not be produced.
///
/// Delivered through
/// [`ThumbnailDelegate::on_thumbnail_generation_failed`](crate::ThumbnailDelegate::on_thumbnail_generation_failed)
/// together with the settled time. The generator always moves on to the next
/// queued timestamp after reporting one of these.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbnailError {
    /// The decoder reported that the seek did not finish, e.g. because it was
    /// superseded or the asset hit a discontinuity.
    #[error("Seek was interrupted before it finished")]
    SeekInterrupted,

    /// The decoder had no frame available at the settled time.
    #[error("No frame could be captured at the settled time")]
    FrameCaptureFailed,

    /// A frame was captured but could not be turned into an image.
    #[error("Captured frame could not be converted to an image")]
    ImageConversionFailed,
}

/// Errors returned by fallible setup operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ThumbqError {
    /// The video file could not be opened.
    #[error("Failed to open video file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to the loader.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate, typically while saving a thumbnail.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for ThumbqError {
    fn from(error: ffmpeg_next::Error) -> Self {
        ThumbqError::FfmpegError(error.to_string())
    }
}
