//! Decoder collaborator interfaces.
//!
//! The generator drives a [`VideoSession`] but never implements one: seeking,
//! demuxing, decoding and pixel-format negotiation all live behind this
//! trait. The crate ships an FFmpeg-backed session behind the `ffmpeg`
//! feature; tests use scripted in-memory sessions.

use std::path::Path;

use crate::conversion::RawFrame;
use crate::error::ThumbqError;

/// Called once when a seek ends. `true` means the seek finished; `false`
/// means it was interrupted.
pub type SeekCompletion = Box<dyn FnOnce(bool) + Send + 'static>;

/// Called once when the session becomes seekable.
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// A single decoder session over one video asset.
///
/// The generator owns its session exclusively and only touches it from its
/// background context, with at most one seek outstanding at a time.
/// Implementations may invoke callbacks on any thread, including
/// synchronously from inside the call that registered them.
pub trait VideoSession: Send {
    /// Seek to `time` seconds, allowing the decoder to land up to
    /// `tolerance_before` seconds earlier or `tolerance_after` seconds later.
    ///
    /// `completion` must be called exactly once.
    fn seek(
        &mut self,
        time: f64,
        tolerance_before: f64,
        tolerance_after: f64,
        completion: SeekCompletion,
    );

    /// Return the decoded frame at `time`, if the decoder has one.
    fn capture_frame(&mut self, time: f64) -> Option<RawFrame>;

    /// Register `callback` to be invoked once the session is seekable.
    ///
    /// If the session is already seekable the callback may run immediately.
    /// A session that never becomes seekable never invokes it.
    fn on_ready_to_play(&mut self, callback: ReadyCallback);
}

impl<S: VideoSession + ?Sized> VideoSession for Box<S> {
    fn seek(
        &mut self,
        time: f64,
        tolerance_before: f64,
        tolerance_after: f64,
        completion: SeekCompletion,
    ) {
        (**self).seek(time, tolerance_before, tolerance_after, completion);
    }

    fn capture_frame(&mut self, time: f64) -> Option<RawFrame> {
        (**self).capture_frame(time)
    }

    fn on_ready_to_play(&mut self, callback: ReadyCallback) {
        (**self).on_ready_to_play(callback);
    }
}

/// Opens decoder sessions for video assets.
pub trait SessionLoader {
    /// The session type produced by this loader.
    type Session: VideoSession + 'static;

    /// Open a session over the asset at `asset`.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbqError::FileOpen`] or [`ThumbqError::NoVideoStream`]
    /// when the asset cannot be decoded.
    fn open_session(&self, asset: &Path) -> Result<Self::Session, ThumbqError>;
}
