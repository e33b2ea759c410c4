//! FFmpeg-backed decoder session.
//!
//! [`FfmpegSession`] implements [`VideoSession`] on top of
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next). FFmpeg probes the
//! container while opening, so the session is seekable as soon as it exists
//! and readiness callbacks fire on registration.
//!
//! A seek jumps to the keyframe at or before the target, decodes forward to
//! the first frame at or after the target, and holds that frame (converted to
//! BGRA) until it is captured.
//!
//! FFmpeg has its own console logging, separate from the Rust
//! [`log`](https://crates.io/crates/log) facade used by this crate; tune it
//! with [`set_ffmpeg_log_level`].

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Rational,
    codec::{context::Context as CodecContext, decoder::Video as VideoDecoder},
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{context::Context as ScalingContext, flag::Flags as ScalingFlags},
    util::log::Level,
};

use crate::conversion::{PixelLayout, RawFrame};
use crate::error::ThumbqError;
use crate::session::{ReadyCallback, SeekCompletion, SessionLoader, VideoSession};
use crate::utilities;

/// Two seek targets closer than this are treated as the same time.
const TIME_EPSILON: f64 = 1e-6;

/// FFmpeg's own console verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print nothing.
    Quiet,
    /// Recoverable errors and worse.
    Error,
    /// Warnings and worse. FFmpeg's default.
    Warning,
    /// Informational messages.
    Info,
    /// Debugging output.
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

/// Set FFmpeg's global console log level.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// A frame decoded by the last seek, waiting to be captured.
struct HeldFrame {
    time: f64,
    frame: RawFrame,
}

/// A [`VideoSession`] over the best video stream of a media file.
pub struct FfmpegSession {
    input: Input,
    decoder: VideoDecoder,
    stream_index: usize,
    time_base: Rational,
    held: Option<HeldFrame>,
    path: PathBuf,
}

impl FfmpegSession {
    /// Open `path` and prepare a decoder for its best video stream.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbqError::FileOpen`] if FFmpeg cannot open the file or
    /// build a decoder, or [`ThumbqError::NoVideoStream`] if the file has no
    /// video.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ThumbqError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening video session: {}", path.display());

        ffmpeg_next::init().map_err(|error| ThumbqError::FileOpen {
            path: path.clone(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        let input = ffmpeg_next::format::input(&path).map_err(|error| ThumbqError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or(ThumbqError::NoVideoStream)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|error| ThumbqError::FileOpen {
                path: path.clone(),
                reason: format!("Failed to create video decoder for stream {stream_index}: {error}"),
            })?;

        log::debug!(
            "Video stream {stream_index}: {}x{} {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            input,
            decoder,
            stream_index,
            time_base,
            held: None,
            path,
        })
    }

    /// Path of the opened file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seek and decode forward to the first frame at or after
    /// `target - tolerance_before`.
    fn decode_at(&mut self, target: f64, tolerance_before: f64) -> Result<RawFrame, ThumbqError> {
        let seek_timestamp = utilities::seconds_to_seek_timestamp(target);
        self.input.seek(seek_timestamp, ..=seek_timestamp)?;
        self.decoder.flush();

        let earliest = target - tolerance_before;
        let time_base = self.time_base;
        let mut decoded = VideoFrame::empty();
        let mut last_frame: Option<VideoFrame> = None;

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;

            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let seconds = frame_seconds(&decoded, time_base).unwrap_or(target);
                if seconds + TIME_EPSILON >= earliest {
                    return to_raw_frame(&decoded);
                }
                last_frame = Some(decoded.clone());
            }
        }

        self.decoder.send_eof()?;
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let seconds = frame_seconds(&decoded, time_base).unwrap_or(target);
            if seconds + TIME_EPSILON >= earliest {
                return to_raw_frame(&decoded);
            }
            last_frame = Some(decoded.clone());
        }

        // Past the last frame: settle on the final frame of the stream.
        match last_frame {
            Some(frame) => to_raw_frame(&frame),
            None => Err(ThumbqError::FfmpegError(format!(
                "No frame decoded at or after {target}s"
            ))),
        }
    }
}

/// Presentation time of `frame` in seconds, if it carries one.
fn frame_seconds(frame: &VideoFrame, time_base: Rational) -> Option<f64> {
    if time_base.denominator() == 0 {
        return None;
    }
    frame
        .timestamp()
        .or_else(|| frame.pts())
        .map(|pts| utilities::pts_to_seconds(pts, time_base))
}

/// Scale a decoded frame to packed BGRA.
fn to_raw_frame(decoded: &VideoFrame) -> Result<RawFrame, ThumbqError> {
    let width = decoded.width();
    let height = decoded.height();
    let mut scaler = ScalingContext::get(
        decoded.format(),
        width,
        height,
        Pixel::BGRA,
        width,
        height,
        ScalingFlags::BILINEAR,
    )?;

    let mut bgra = VideoFrame::empty();
    scaler.run(decoded, &mut bgra)?;

    Ok(RawFrame {
        width,
        height,
        stride: bgra.stride(0),
        layout: PixelLayout::Bgra8,
        data: bgra.data(0).to_vec(),
    })
}

impl VideoSession for FfmpegSession {
    fn seek(
        &mut self,
        time: f64,
        tolerance_before: f64,
        _tolerance_after: f64,
        completion: SeekCompletion,
    ) {
        self.held = None;
        match self.decode_at(time, tolerance_before) {
            Ok(frame) => {
                self.held = Some(HeldFrame { time, frame });
                completion(true);
            }
            Err(error) => {
                log::debug!("Seek to {time}s in {} failed: {error}", self.path.display());
                completion(false);
            }
        }
    }

    fn capture_frame(&mut self, time: f64) -> Option<RawFrame> {
        match self.held.take() {
            Some(held) if (held.time - time).abs() < TIME_EPSILON => Some(held.frame),
            Some(held) => {
                log::debug!("Held frame is for {}s, not {time}s", held.time);
                None
            }
            None => None,
        }
    }

    fn on_ready_to_play(&mut self, callback: ReadyCallback) {
        callback();
    }
}

/// Opens [`FfmpegSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegLoader;

impl SessionLoader for FfmpegLoader {
    type Session = FfmpegSession;

    fn open_session(&self, asset: &Path) -> Result<Self::Session, ThumbqError> {
        FfmpegSession::open(asset)
    }
}
