//! The thumbnail generator.
//!
//! [`ThumbnailGenerator`] turns a queue of requested timestamps into a strictly
//! serial sequence of *seek → settle → capture → convert → deliver* steps
//! against one [`VideoSession`]. The decoder only supports a single seek in
//! flight, so the next seek is never issued before the previous timestamp has
//! been resolved and its result dispatched.
//!
//! Requests made before the session reports that it is seekable are held
//! back. The first readiness notification starts a drain of everything that
//! was queued in the meantime.
//!
//! Every timestamp ends in exactly one delegate callback. Failures are
//! reported and skipped; they never stop the queue.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, mpsc};
//!
//! use thumbq::{
//!     ChannelDelegate, GeneratorOptions, ImageConverter, ImmediateDispatcher, PixelLayout,
//!     RawFrame, ReadyCallback, SeekCompletion, ThumbnailGenerator, VideoSession,
//! };
//!
//! struct Solid;
//!
//! impl VideoSession for Solid {
//!     fn seek(&mut self, _time: f64, _before: f64, _after: f64, completion: SeekCompletion) {
//!         completion(true);
//!     }
//!
//!     fn capture_frame(&mut self, _time: f64) -> Option<RawFrame> {
//!         Some(RawFrame::packed(2, 2, PixelLayout::Rgb8, vec![255; 12]))
//!     }
//!
//!     fn on_ready_to_play(&mut self, callback: ReadyCallback) {
//!         callback();
//!     }
//! }
//!
//! let generator = ThumbnailGenerator::new(
//!     Solid,
//!     ImageConverter::new(),
//!     Arc::new(ImmediateDispatcher::new()),
//!     Arc::new(ImmediateDispatcher::new()),
//!     GeneratorOptions::new(),
//! );
//!
//! let (sender, receiver) = mpsc::channel();
//! let delegate = Arc::new(ChannelDelegate::new(sender));
//! generator.set_delegate(&delegate);
//! generator.request_thumbnails(&[1.0, 5.0]);
//!
//! let times: Vec<f64> = receiver.try_iter().map(|result| result.time()).collect();
//! assert_eq!(times, vec![1.0, 5.0]);
//! ```

use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter, Result as FmtResult},
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use image::DynamicImage;

use crate::configuration::GeneratorOptions;
use crate::conversion::{FrameConverter, ImageConverter};
use crate::delegate::{ThumbnailDelegate, ThumbnailResult};
use crate::dispatch::{Dispatcher, SerialQueue};
use crate::error::{ThumbnailError, ThumbqError};
use crate::session::{SessionLoader, VideoSession};
use crate::utilities::{self, lock};

/// Whether the session has become seekable.
///
/// Moves from [`Loading`](Readiness::Loading) to [`Ready`](Readiness::Ready)
/// once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// Waiting for the decoder. Requests are buffered.
    #[default]
    Loading,
    /// The decoder accepts seeks. Requests are drained.
    Ready,
}

/// Queue state, only mutated from the background context.
#[derive(Debug, Default)]
struct Pipeline {
    queue: VecDeque<f64>,
    readiness: Readiness,
    draining: bool,
}

impl Pipeline {
    /// Claim the right to start a drain. Only one drain runs at a time; a
    /// running drain picks up anything appended before it empties the queue.
    fn begin_drain(&mut self) -> bool {
        if self.readiness == Readiness::Ready && !self.draining && !self.queue.is_empty() {
            self.draining = true;
            true
        } else {
            false
        }
    }

    /// Pop the next timestamp, ending the drain when there is none.
    fn pop_next(&mut self) -> Option<f64> {
        let next = self.queue.pop_front();
        if next.is_none() {
            self.draining = false;
        }
        next
    }
}

struct Inner {
    pipeline: Mutex<Pipeline>,
    session: Mutex<Box<dyn VideoSession>>,
    converter: Box<dyn FrameConverter>,
    delegate: Mutex<Option<Weak<dyn ThumbnailDelegate>>>,
    main: Arc<dyn Dispatcher>,
    background: Arc<dyn Dispatcher>,
    options: GeneratorOptions,
}

/// Generates thumbnails from one video session, one timestamp at a time.
///
/// Results are delivered to the delegate registered with
/// [`set_delegate`](ThumbnailGenerator::set_delegate). Dropping the generator
/// stops the pipeline after the step that is currently running; remaining
/// timestamps produce no callbacks.
pub struct ThumbnailGenerator {
    inner: Arc<Inner>,
}

impl ThumbnailGenerator {
    /// Create a generator over `session`.
    ///
    /// `main` receives result deliveries only. `background` runs all seeks,
    /// settle delays and captures, and must run one work item at a time.
    pub fn new<S, C>(
        session: S,
        converter: C,
        main: Arc<dyn Dispatcher>,
        background: Arc<dyn Dispatcher>,
        options: GeneratorOptions,
    ) -> Self
    where
        S: VideoSession + 'static,
        C: FrameConverter + 'static,
    {
        let inner = Arc::new(Inner {
            pipeline: Mutex::new(Pipeline::default()),
            session: Mutex::new(Box::new(session)),
            converter: Box::new(converter),
            delegate: Mutex::new(None),
            main,
            background,
            options,
        });

        // The queue is still empty here, so a synchronous readiness callback
        // cannot reach the session lock held by this registration.
        let weak = Arc::downgrade(&inner);
        lock(&inner.session).on_ready_to_play(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.post(Inner::mark_ready);
            }
        }));

        Self { inner }
    }

    /// Create a generator over `session` with the default converter,
    /// default options, and two fresh [`SerialQueue`]s.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbqError::IoError`] if a worker thread cannot be spawned.
    pub fn with_defaults<S>(session: S) -> Result<Self, ThumbqError>
    where
        S: VideoSession + 'static,
    {
        let main = SerialQueue::new("thumbq-main")?;
        let background = SerialQueue::new("thumbq-background")?;
        Ok(Self::new(
            session,
            ImageConverter::default(),
            Arc::new(main),
            Arc::new(background),
            GeneratorOptions::default(),
        ))
    }

    /// Open `asset` through `loader` and create a generator with defaults.
    ///
    /// # Errors
    ///
    /// Returns any error from [`SessionLoader::open_session`], or
    /// [`ThumbqError::IoError`] if a worker thread cannot be spawned.
    pub fn from_loader<L, P>(loader: &L, asset: P) -> Result<Self, ThumbqError>
    where
        L: SessionLoader,
        P: AsRef<Path>,
    {
        let session = loader.open_session(asset.as_ref())?;
        Self::with_defaults(session)
    }

    /// Open a video file with FFmpeg and create a generator with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbqError::FileOpen`] or [`ThumbqError::NoVideoStream`] if
    /// the file cannot be decoded.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::{Arc, mpsc};
    ///
    /// use thumbq::{ChannelDelegate, ThumbnailGenerator};
    ///
    /// let generator = ThumbnailGenerator::open("input.mp4")?;
    /// let (sender, receiver) = mpsc::channel();
    /// let delegate = Arc::new(ChannelDelegate::new(sender));
    /// generator.set_delegate(&delegate);
    /// generator.request_thumbnails(&[1.0, 5.0, 10.0]);
    ///
    /// for result in receiver.iter().take(3) {
    ///     if let Some(image) = result.clone().into_image() {
    ///         image.save(format!("thumb_{}.png", result.time()))?;
    ///     }
    /// }
    /// # Ok::<(), thumbq::ThumbqError>(())
    /// ```
    #[cfg(feature = "ffmpeg")]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ThumbqError> {
        Self::from_loader(&crate::ffmpeg::FfmpegLoader, path)
    }

    /// Register the delegate that receives results.
    ///
    /// Only a weak reference is kept. Results produced after the delegate is
    /// dropped are discarded.
    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: ThumbnailDelegate + 'static,
    {
        let weak: Weak<D> = Arc::downgrade(delegate);
        let weak: Weak<dyn ThumbnailDelegate> = weak;
        *lock(&self.inner.delegate) = Some(weak);
    }

    /// Stop delivering results to any delegate.
    pub fn clear_delegate(&self) {
        *lock(&self.inner.delegate) = None;
    }

    /// Queue thumbnails for `times`, in order.
    ///
    /// Returns immediately; the append itself happens on the background
    /// context. Duplicates and any ordering are allowed. NaN and negative
    /// times are treated as `0.0`. An empty slice does nothing.
    pub fn request_thumbnails(&self, times: &[f64]) {
        if times.is_empty() {
            return;
        }

        let times: Vec<f64> = times
            .iter()
            .map(|&time| {
                let (sanitized, changed) = utilities::sanitize_seconds(time);
                if changed {
                    log::warn!("Requested time {time} is not a valid position, using {sanitized}");
                }
                sanitized
            })
            .collect();

        self.inner.post(move |inner| inner.enqueue(times));
    }

    /// Current readiness of the underlying session.
    pub fn readiness(&self) -> Readiness {
        lock(&self.inner.pipeline).readiness
    }

    /// Returns `true` once the session has become seekable.
    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Number of timestamps queued but not yet started.
    ///
    /// Requests still waiting to be appended on the background context are
    /// not counted.
    pub fn pending(&self) -> usize {
        lock(&self.inner.pipeline).queue.len()
    }

    /// The options this generator was created with.
    pub fn options(&self) -> &GeneratorOptions {
        &self.inner.options
    }
}

impl Debug for ThumbnailGenerator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let pipeline = lock(&self.inner.pipeline);
        f.debug_struct("ThumbnailGenerator")
            .field("readiness", &pipeline.readiness)
            .field("pending", &pipeline.queue.len())
            .field("draining", &pipeline.draining)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Run `work` on the background context, unless the generator is gone by
    /// then.
    fn post<F>(self: &Arc<Self>, work: F)
    where
        F: FnOnce(&Arc<Inner>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.background.run_async(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                work(&inner);
            }
        }));
    }

    fn post_after<F>(self: &Arc<Self>, delay: Duration, work: F)
    where
        F: FnOnce(&Arc<Inner>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.background.run_after_delay(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    work(&inner);
                }
            }),
        );
    }

    fn enqueue(self: &Arc<Self>, times: Vec<f64>) {
        let start = {
            let mut pipeline = lock(&self.pipeline);
            pipeline.queue.extend(times);
            log::debug!(
                "Queued thumbnail requests ({} pending, {:?})",
                pipeline.queue.len(),
                pipeline.readiness
            );
            pipeline.begin_drain()
        };
        if start {
            self.post(Inner::process_next);
        }
    }

    fn mark_ready(self: &Arc<Self>) {
        let start = {
            let mut pipeline = lock(&self.pipeline);
            if pipeline.readiness == Readiness::Ready {
                return;
            }
            pipeline.readiness = Readiness::Ready;
            log::debug!(
                "Video session ready with {} buffered requests",
                pipeline.queue.len()
            );
            pipeline.begin_drain()
        };
        if start {
            self.post(Inner::process_next);
        }
    }

    /// One drain step: pop a timestamp and issue its seek. Every path that
    /// resolves the timestamp posts the next step, so the drain is a chain
    /// of work items rather than a recursive call.
    fn process_next(self: &Arc<Self>) {
        let Some(requested) = lock(&self.pipeline).pop_next() else {
            log::debug!("Thumbnail queue drained");
            return;
        };

        let time = self.options.settled_time(requested);
        let (tolerance_before, tolerance_after) = self.options.tolerance();
        log::debug!("Seeking to {time}s (requested {requested}s)");

        let weak = Arc::downgrade(self);
        lock(&self.session).seek(
            time,
            tolerance_before,
            tolerance_after,
            Box::new(move |finished| {
                if let Some(inner) = weak.upgrade() {
                    inner.post(move |inner| inner.seek_finished(time, finished));
                }
            }),
        );
    }

    fn seek_finished(self: &Arc<Self>, time: f64, finished: bool) {
        if !finished {
            self.deliver(ThumbnailResult::Failed {
                error: ThumbnailError::SeekInterrupted,
                time,
            });
            self.post(Inner::process_next);
            return;
        }

        log::debug!(
            "Seek to {time}s finished, capturing after {:?}",
            self.options.settle_delay
        );
        self.post_after(self.options.settle_delay, move |inner| inner.capture(time));
    }

    fn capture(self: &Arc<Self>, time: f64) {
        let result = match self.capture_image(time) {
            Ok(image) => ThumbnailResult::Generated { image, time },
            Err(error) => ThumbnailResult::Failed { error, time },
        };

        self.deliver(result);
        self.post(Inner::process_next);
    }

    /// Capture and convert the frame at `time`. A panicking session or
    /// converter counts as a failure of that step.
    fn capture_image(&self, time: f64) -> Result<DynamicImage, ThumbnailError> {
        let frame = panic::catch_unwind(AssertUnwindSafe(|| {
            lock(&self.session).capture_frame(time)
        }))
        .unwrap_or_else(|_| {
            log::warn!("Frame capture at {time}s panicked");
            None
        })
        .ok_or(ThumbnailError::FrameCaptureFailed)?;

        panic::catch_unwind(AssertUnwindSafe(|| self.converter.convert(&frame)))
            .unwrap_or_else(|_| {
                log::warn!("Frame conversion at {time}s panicked");
                None
            })
            .ok_or(ThumbnailError::ImageConversionFailed)
    }

    /// Dispatch `result` to the main context without waiting for it to be
    /// handled. The delegate is looked up when the delivery runs.
    fn deliver(self: &Arc<Self>, result: ThumbnailResult) {
        match &result {
            ThumbnailResult::Generated { image, time } => {
                log::debug!(
                    "Generated {}x{} thumbnail at {time}s",
                    image.width(),
                    image.height()
                );
            }
            ThumbnailResult::Failed { error, time } => {
                log::warn!("Thumbnail at {time}s failed: {error}");
            }
        }

        let weak = Arc::downgrade(self);
        self.main.run_async(Box::new(move || {
            let delegate = weak.upgrade().and_then(|inner| {
                let registered = lock(&inner.delegate).clone();
                registered.as_ref().and_then(Weak::upgrade)
            });
            match delegate {
                Some(delegate) => result.deliver_to(delegate.as_ref()),
                None => log::trace!("No delegate for thumbnail at {}s", result.time()),
            }
        }));
    }
}
