//! # thumbq
//!
//! Generate still thumbnails from a video at a list of timestamps, in the
//! background, one seek at a time.
//!
//! A [`ThumbnailGenerator`] owns a single decoder [`VideoSession`] and a queue
//! of requested times. Requests made before the session is seekable are
//! buffered. Once it is ready, the generator drains the queue strictly in
//! order: seek, wait a short settle delay, capture the frame, convert it to an
//! [`image::DynamicImage`], and hand the result to a [`ThumbnailDelegate`].
//! A failure for one timestamp is reported and skipped; it never stalls the
//! rest of the queue.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::{Arc, mpsc};
//!
//! use thumbq::{ChannelDelegate, ThumbnailGenerator, ThumbnailResult, VideoSession};
//!
//! # fn example<S: VideoSession + 'static>(session: S) -> Result<(), thumbq::ThumbqError> {
//! // With the `ffmpeg` feature: `ThumbnailGenerator::open("input.mp4")?`
//! let generator = ThumbnailGenerator::with_defaults(session)?;
//! let (sender, receiver) = mpsc::channel();
//! let delegate = Arc::new(ChannelDelegate::new(sender));
//! generator.set_delegate(&delegate);
//!
//! generator.request_thumbnails(&[1.0, 5.0, 10.0]);
//!
//! for result in receiver.iter().take(3) {
//!     match result {
//!         ThumbnailResult::Generated { image, time } => image.save(format!("thumb_{time}.png"))?,
//!         ThumbnailResult::Failed { error, time } => eprintln!("{time}s: {error}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution contexts
//!
//! The generator never spawns threads. It posts work to two injected
//! [`Dispatcher`]s: *main* for result delivery and *background* for seeks and
//! captures. [`SerialQueue`] is the default; [`ImmediateDispatcher`] and
//! [`ManualDispatcher`] make the pipeline fully deterministic in tests.
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | `FfmpegSession` decoder and the `thumbq` command-line tool |
//! | `async` | `TokioDispatcher` and `ThumbnailStream` for Tokio applications |
//! | `full` | Enables all of the above |

pub mod configuration;
pub mod conversion;
pub mod delegate;
pub mod dispatch;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod generator;
pub mod session;
#[cfg(feature = "async")]
pub mod stream;
mod utilities;

pub use configuration::{DEFAULT_SETTLE_DELAY, DEFAULT_TIME_SCALE, GeneratorOptions};
pub use conversion::{FrameConverter, ImageConverter, PixelLayout, RawFrame};
pub use delegate::{ChannelDelegate, ThumbnailDelegate, ThumbnailResult};
pub use dispatch::{Dispatcher, ImmediateDispatcher, ManualDispatcher, SerialQueue, Work};
pub use error::{ThumbnailError, ThumbqError};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegLoader, FfmpegLogLevel, FfmpegSession, set_ffmpeg_log_level};
pub use generator::{Readiness, ThumbnailGenerator};
pub use session::{ReadyCallback, SeekCompletion, SessionLoader, VideoSession};
#[cfg(feature = "async")]
pub use stream::{ThumbnailStream, TokioDispatcher};
