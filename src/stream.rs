//! Async integration via Tokio.
//!
//! [`TokioDispatcher`] lets a [`ThumbnailGenerator`](crate::ThumbnailGenerator)
//! run its background work on a Tokio runtime, and [`ThumbnailStream`] turns
//! delegate callbacks into an async stream of [`ThumbnailResult`]s.
//!
//! Seeks and captures block on the decoder, so the dispatcher runs each work
//! item through `tokio::task::spawn_blocking`, one at a time, from a single
//! consumer task. This keeps FFmpeg work off the runtime's worker threads
//! while still never running two generator steps at once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_stream::StreamExt;
//!
//! use thumbq::{
//!     GeneratorOptions, ImageConverter, ThumbnailGenerator, ThumbnailStream, TokioDispatcher,
//! };
//!
//! # async fn example<S: thumbq::VideoSession + 'static>(session: S) {
//! let handle = tokio::runtime::Handle::current();
//! let generator = ThumbnailGenerator::new(
//!     session,
//!     ImageConverter::new().with_max_dimension(320),
//!     Arc::new(TokioDispatcher::new(handle.clone())),
//!     Arc::new(TokioDispatcher::new(handle)),
//!     GeneratorOptions::new(),
//! );
//!
//! let mut results = ThumbnailStream::attach(&generator).take(3);
//! generator.request_thumbnails(&[1.0, 5.0, 10.0]);
//!
//! while let Some(result) = results.next().await {
//!     println!("{}s: {}", result.time(), result.is_success());
//! }
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use image::DynamicImage;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_stream::Stream;

use crate::delegate::{ThumbnailDelegate, ThumbnailResult};
use crate::dispatch::{Dispatcher, Work};
use crate::error::ThumbnailError;
use crate::generator::ThumbnailGenerator;

/// A serial [`Dispatcher`] backed by a Tokio runtime.
///
/// Work items run in posting order on Tokio's blocking pool, never two at a
/// time. Delayed items are held by a timer task and join the queue when their
/// delay expires. Dropping the dispatcher lets the consumer task finish once
/// every pending timer has fired.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: Handle,
    sender: UnboundedSender<Work>,
}

impl TokioDispatcher {
    /// Start the consumer task on `handle`.
    pub fn new(handle: Handle) -> Self {
        let (sender, mut receiver) = unbounded_channel::<Work>();
        handle.spawn(async move {
            while let Some(work) = receiver.recv().await {
                if tokio::task::spawn_blocking(work).await.is_err() {
                    log::warn!("Thumbnail work item panicked");
                }
            }
        });
        Self { handle, sender }
    }
}

impl Dispatcher for TokioDispatcher {
    fn run_async(&self, work: Work) {
        if self.sender.send(work).is_err() {
            log::trace!("Tokio dispatcher stopped, dropping work");
        }
    }

    fn run_after_delay(&self, delay: Duration, work: Work) {
        let sender = self.sender.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(work).is_err() {
                log::trace!("Tokio dispatcher stopped, dropping delayed work");
            }
        });
    }
}

/// Delegate half of a [`ThumbnailStream`].
struct StreamDelegate {
    sender: UnboundedSender<ThumbnailResult>,
}

impl StreamDelegate {
    fn send(&self, result: ThumbnailResult) {
        if self.sender.send(result).is_err() {
            log::trace!("Thumbnail stream dropped");
        }
    }
}

impl ThumbnailDelegate for StreamDelegate {
    fn on_thumbnail_generated(&self, image: DynamicImage, time: f64) {
        self.send(ThumbnailResult::Generated { image, time });
    }

    fn on_thumbnail_generation_failed(&self, error: ThumbnailError, time: f64) {
        self.send(ThumbnailResult::Failed { error, time });
    }
}

/// An async stream of results from a [`ThumbnailGenerator`].
///
/// The stream owns the delegate it registers, so results stop flowing once
/// the stream is dropped. It never ends on its own; use `take(n)` for the
/// `n` timestamps that were requested.
pub struct ThumbnailStream {
    receiver: UnboundedReceiver<ThumbnailResult>,
    _delegate: Arc<StreamDelegate>,
}

impl ThumbnailStream {
    /// Register a new stream as `generator`'s delegate, replacing any
    /// previous delegate.
    pub fn attach(generator: &ThumbnailGenerator) -> Self {
        let (sender, receiver) = unbounded_channel();
        let delegate = Arc::new(StreamDelegate { sender });
        generator.set_delegate(&delegate);
        Self {
            receiver,
            _delegate: delegate,
        }
    }
}

impl Stream for ThumbnailStream {
    type Item = ThumbnailResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
