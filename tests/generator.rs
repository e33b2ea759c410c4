//! Integration tests for the thumbnail generator pipeline.
//!
//! All tests run against a scripted in-memory session, so no media fixture
//! is needed. Deterministic dispatchers drive the pipeline step by step.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use common::{Recorder, Script, ScriptedSession, SessionProbe};
use image::DynamicImage;
use thumbq::{
    ChannelDelegate, Dispatcher, FrameConverter, GeneratorOptions, ImageConverter,
    ImmediateDispatcher, ManualDispatcher, RawFrame, Readiness, SerialQueue, ThumbnailDelegate,
    ThumbnailError, ThumbnailGenerator,
};

fn immediate_generator(script: Script) -> (ThumbnailGenerator, SessionProbe, Arc<Recorder>) {
    immediate_generator_with(script, GeneratorOptions::new())
}

fn immediate_generator_with(
    script: Script,
    options: GeneratorOptions,
) -> (ThumbnailGenerator, SessionProbe, Arc<Recorder>) {
    let (session, probe) = ScriptedSession::new(script);
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::new(ImmediateDispatcher::new()),
        Arc::new(ImmediateDispatcher::new()),
        options,
    );
    let recorder = Recorder::new();
    generator.set_delegate(&recorder);
    (generator, probe, recorder)
}

/// Generator whose background context only advances when the test says so.
fn manual_generator(
    script: Script,
) -> (
    ThumbnailGenerator,
    SessionProbe,
    Arc<Recorder>,
    Arc<ManualDispatcher>,
) {
    let (session, probe) = ScriptedSession::new(script);
    let background = Arc::new(ManualDispatcher::new());
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::new(ImmediateDispatcher::new()),
        Arc::clone(&background) as Arc<dyn Dispatcher>,
        GeneratorOptions::new(),
    );
    let recorder = Recorder::new();
    generator.set_delegate(&recorder);
    (generator, probe, recorder, background)
}

fn first_channel(image: &DynamicImage) -> u8 {
    image.to_rgb8().get_pixel(0, 0).0[0]
}

// ── Ordered delivery ───────────────────────────────────────────────

#[test]
fn three_requests_produce_three_successes_in_order() {
    let (generator, probe, recorder) = immediate_generator(Script::default());

    generator.request_thumbnails(&[1.0, 5.0, 10.0]);

    assert_eq!(recorder.times(), vec![1.0, 5.0, 10.0]);
    assert_eq!(recorder.errors(), vec![None, None, None]);
    assert_eq!(probe.seeks(), vec![1.0, 5.0, 10.0]);
    assert_eq!(probe.captures(), vec![1.0, 5.0, 10.0]);
    assert_eq!(generator.pending(), 0);
}

#[test]
fn each_result_carries_the_frame_for_its_time() {
    let (generator, _probe, recorder) = immediate_generator(Script::default());

    generator.request_thumbnails(&[1.0, 5.0, 10.0]);

    let pixels: Vec<u8> = recorder
        .results()
        .into_iter()
        .filter_map(|result| result.into_image())
        .map(|image| first_channel(&image))
        .collect();
    assert_eq!(pixels, vec![10, 50, 100]);
}

#[test]
fn seek_and_capture_alternate_strictly() {
    use common::Event::{Capture, Seek};

    let (generator, probe, _recorder) = immediate_generator(Script::default());

    generator.request_thumbnails(&[3.0, 1.0]);

    assert_eq!(
        probe.events(),
        vec![Seek(3.0), Capture(3.0), Seek(1.0), Capture(1.0)]
    );
    assert_eq!(probe.max_seeks_in_flight(), 1);
}

#[test]
fn duplicate_times_are_each_delivered() {
    let (generator, probe, recorder) = immediate_generator(Script::default());

    generator.request_thumbnails(&[2.0, 2.0, 2.0]);

    assert_eq!(recorder.times(), vec![2.0, 2.0, 2.0]);
    assert_eq!(probe.seeks(), vec![2.0, 2.0, 2.0]);
}

#[test]
fn separate_batches_keep_request_order() {
    let (generator, _probe, recorder) = immediate_generator(Script::default());

    generator.request_thumbnails(&[8.0, 2.0]);
    generator.request_thumbnails(&[5.0]);

    assert_eq!(recorder.times(), vec![8.0, 2.0, 5.0]);
}

// ── Failures ───────────────────────────────────────────────────────

#[test]
fn interrupted_seek_is_reported_and_skipped() {
    let script = Script {
        interrupt_at: vec![4.0],
        ..Script::default()
    };
    let (generator, probe, recorder) = immediate_generator(script);

    generator.request_thumbnails(&[2.0, 4.0]);

    assert_eq!(recorder.times(), vec![2.0, 4.0]);
    assert_eq!(
        recorder.errors(),
        vec![None, Some(ThumbnailError::SeekInterrupted)]
    );
    assert_eq!(probe.captures(), vec![2.0]);
}

#[test]
fn missing_frame_reports_capture_failure() {
    let script = Script {
        no_frame_at: vec![3.0],
        ..Script::default()
    };
    let (generator, _probe, recorder) = immediate_generator(script);

    generator.request_thumbnails(&[3.0, 6.0]);

    assert_eq!(
        recorder.errors(),
        vec![Some(ThumbnailError::FrameCaptureFailed), None]
    );
}

#[test]
fn unconvertible_frame_reports_conversion_failure() {
    let script = Script {
        corrupt_frame_at: vec![7.0],
        ..Script::default()
    };
    let (generator, _probe, recorder) = immediate_generator(script);

    generator.request_thumbnails(&[7.0]);

    assert_eq!(
        recorder.errors(),
        vec![Some(ThumbnailError::ImageConversionFailed)]
    );
}

#[test]
fn custom_converter_rejection_is_a_conversion_failure() {
    let (session, _probe) = ScriptedSession::succeeding();
    let reject_all = |_frame: &RawFrame| -> Option<DynamicImage> { None };
    let generator = ThumbnailGenerator::new(
        session,
        reject_all,
        Arc::new(ImmediateDispatcher::new()),
        Arc::new(ImmediateDispatcher::new()),
        GeneratorOptions::new(),
    );
    let recorder = Recorder::new();
    generator.set_delegate(&recorder);

    generator.request_thumbnails(&[1.0, 2.0]);

    assert_eq!(
        recorder.errors(),
        vec![
            Some(ThumbnailError::ImageConversionFailed),
            Some(ThumbnailError::ImageConversionFailed)
        ]
    );
}

#[test]
fn mixed_failures_still_yield_one_callback_per_time() {
    let script = Script {
        interrupt_at: vec![2.0],
        no_frame_at: vec![3.0],
        corrupt_frame_at: vec![4.0],
        ..Script::default()
    };
    let (generator, _probe, recorder) = immediate_generator(script);

    generator.request_thumbnails(&[1.0, 2.0, 3.0, 4.0, 5.0]);

    assert_eq!(recorder.times(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(
        recorder.errors(),
        vec![
            None,
            Some(ThumbnailError::SeekInterrupted),
            Some(ThumbnailError::FrameCaptureFailed),
            Some(ThumbnailError::ImageConversionFailed),
            None,
        ]
    );
}

// ── Readiness ──────────────────────────────────────────────────────

#[test]
fn session_ready_on_registration_is_ready_immediately() {
    let (generator, _probe, _recorder) = immediate_generator(Script::default());
    assert!(generator.is_ready());
    assert_eq!(generator.readiness(), Readiness::Ready);
}

#[test]
fn requests_before_readiness_are_buffered() {
    let script = Script {
        manual_ready: true,
        ..Script::default()
    };
    let (generator, probe, recorder) = immediate_generator(script);

    generator.request_thumbnails(&[1.0, 2.0]);

    assert_eq!(generator.readiness(), Readiness::Loading);
    assert_eq!(generator.pending(), 2);
    assert!(probe.seeks().is_empty());
    assert!(recorder.results().is_empty());

    assert!(probe.signal_ready());

    assert!(generator.is_ready());
    assert_eq!(recorder.times(), vec![1.0, 2.0]);
    assert_eq!(generator.pending(), 0);
}

#[test]
fn readiness_with_empty_queue_starts_nothing() {
    let script = Script {
        manual_ready: true,
        ..Script::default()
    };
    let (generator, probe, recorder) = immediate_generator(script);

    assert!(probe.signal_ready());
    assert!(generator.is_ready());
    assert!(probe.seeks().is_empty());

    generator.request_thumbnails(&[4.0]);
    assert_eq!(recorder.times(), vec![4.0]);
}

// ── Serialisation ──────────────────────────────────────────────────

#[test]
fn next_seek_waits_for_the_previous_completion() {
    let script = Script {
        deferred: true,
        ..Script::default()
    };
    let (generator, probe, recorder) = immediate_generator(script);

    generator.request_thumbnails(&[1.0, 2.0, 3.0]);
    assert_eq!(probe.seeks(), vec![1.0]);
    assert_eq!(probe.pending_completions(), 1);

    assert_eq!(probe.complete_next(true), Some(1.0));
    assert_eq!(probe.seeks(), vec![1.0, 2.0]);
    assert_eq!(recorder.times(), vec![1.0]);

    assert_eq!(probe.complete_next(false), Some(2.0));
    assert_eq!(probe.complete_next(true), Some(3.0));
    assert_eq!(probe.complete_next(true), None);

    assert_eq!(probe.max_seeks_in_flight(), 1);
    assert_eq!(
        recorder.errors(),
        vec![None, Some(ThumbnailError::SeekInterrupted), None]
    );
}

#[test]
fn append_during_drain_joins_the_running_drain() {
    let (generator, probe, recorder, background) = manual_generator(Script::default());

    generator.request_thumbnails(&[1.0, 2.0]);
    background.run_ready();
    assert_eq!(probe.seeks(), vec![1.0]);
    assert!(probe.captures().is_empty());

    generator.request_thumbnails(&[3.0]);
    background.run_ready();
    assert_eq!(probe.seeks(), vec![1.0]);
    assert_eq!(generator.pending(), 2);

    background.run_until_idle();

    assert_eq!(probe.seeks(), vec![1.0, 2.0, 3.0]);
    assert_eq!(recorder.times(), vec![1.0, 2.0, 3.0]);
    assert_eq!(probe.max_seeks_in_flight(), 1);
}

#[test]
fn long_queue_drains_without_recursion() {
    let (generator, _probe, recorder) = immediate_generator(Script::default());
    let times: Vec<f64> = (0..5_000).map(|index| index as f64 * 0.5).collect();

    generator.request_thumbnails(&times);

    let results = recorder.results();
    assert_eq!(results.len(), times.len());
    assert!(results.iter().all(|result| result.is_success()));
    assert_eq!(recorder.times(), times);
}

// ── Timing ─────────────────────────────────────────────────────────

#[test]
fn capture_waits_for_settle_delay() {
    let (generator, probe, recorder, background) = manual_generator(Script::default());

    generator.request_thumbnails(&[1.0]);
    background.run_ready();
    assert_eq!(probe.seeks(), vec![1.0]);

    background.advance(Duration::from_millis(299));
    assert!(probe.captures().is_empty());
    assert!(recorder.results().is_empty());

    background.advance(Duration::from_millis(1));
    assert_eq!(probe.captures(), vec![1.0]);
    assert_eq!(recorder.times(), vec![1.0]);
}

#[test]
fn custom_settle_delay_is_used() {
    let (session, probe) = ScriptedSession::succeeding();
    let background = Arc::new(ManualDispatcher::new());
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::new(ImmediateDispatcher::new()),
        Arc::clone(&background) as Arc<dyn Dispatcher>,
        GeneratorOptions::new().with_settle_delay(Duration::from_millis(50)),
    );

    generator.request_thumbnails(&[1.0]);
    background.run_ready();
    background.advance(Duration::from_millis(49));
    assert!(probe.captures().is_empty());
    background.advance(Duration::from_millis(1));
    assert_eq!(probe.captures(), vec![1.0]);
}

#[test]
fn virtual_clock_accumulates_one_delay_per_capture() {
    let (session, _probe) = ScriptedSession::succeeding();
    let background = Arc::new(ImmediateDispatcher::new());
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::new(ImmediateDispatcher::new()),
        Arc::clone(&background) as Arc<dyn Dispatcher>,
        GeneratorOptions::new(),
    );

    generator.request_thumbnails(&[1.0, 5.0, 10.0]);

    assert_eq!(background.now(), Duration::from_millis(900));
}

// ── Timestamps ─────────────────────────────────────────────────────

#[test]
fn coarse_time_scale_rounds_reported_time() {
    let options = GeneratorOptions::new().with_time_scale(1);
    let (generator, probe, recorder) = immediate_generator_with(Script::default(), options);

    generator.request_thumbnails(&[2.4, 2.6]);

    assert_eq!(probe.seeks(), vec![2.0, 3.0]);
    assert_eq!(recorder.times(), vec![2.0, 3.0]);
}

#[test]
fn default_time_scale_quantises_to_ticks() {
    let (generator, _probe, recorder) = immediate_generator(Script::default());

    generator.request_thumbnails(&[1.2345]);

    let reported = recorder.times()[0];
    assert!((reported - 741.0 / 600.0).abs() < 1e-12);
}

#[test]
fn invalid_times_are_clamped_to_zero() {
    let (generator, probe, recorder) = immediate_generator(Script::default());

    generator.request_thumbnails(&[-3.0, f64::NAN]);

    assert_eq!(probe.seeks(), vec![0.0, 0.0]);
    assert_eq!(recorder.errors(), vec![None, None]);
}

// ── Requests and delegates ─────────────────────────────────────────

#[test]
fn empty_request_posts_no_work() {
    let (generator, probe, recorder, background) = manual_generator(Script::default());
    background.run_until_idle();

    generator.request_thumbnails(&[]);

    assert_eq!(background.pending(), 0);
    assert!(probe.events().is_empty());
    assert!(recorder.results().is_empty());
}

#[test]
fn dropped_delegate_is_tolerated() {
    let (session, probe) = ScriptedSession::succeeding();
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::new(ImmediateDispatcher::new()),
        Arc::new(ImmediateDispatcher::new()),
        GeneratorOptions::new(),
    );
    let gone = Recorder::new();
    generator.set_delegate(&gone);
    drop(gone);

    generator.request_thumbnails(&[1.0]);
    assert_eq!(probe.captures(), vec![1.0]);

    let recorder = Recorder::new();
    generator.set_delegate(&recorder);
    generator.request_thumbnails(&[2.0]);
    assert_eq!(recorder.times(), vec![2.0]);
}

#[test]
fn cleared_delegate_receives_nothing() {
    let (generator, probe, recorder) = immediate_generator(Script::default());

    generator.clear_delegate();
    generator.request_thumbnails(&[1.0]);

    assert_eq!(probe.captures(), vec![1.0]);
    assert!(recorder.results().is_empty());
}

#[test]
fn results_are_delivered_on_the_main_context() {
    let (session, _probe) = ScriptedSession::succeeding();
    let main = Arc::new(ManualDispatcher::new());
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::clone(&main) as Arc<dyn Dispatcher>,
        Arc::new(ImmediateDispatcher::new()),
        GeneratorOptions::new(),
    );
    let recorder = Recorder::new();
    generator.set_delegate(&recorder);

    generator.request_thumbnails(&[1.0, 2.0]);
    assert!(recorder.results().is_empty());
    assert_eq!(main.pending(), 2);

    main.run_until_idle();
    assert_eq!(recorder.times(), vec![1.0, 2.0]);
}

#[test]
fn delegate_is_resolved_when_the_result_is_delivered() {
    let (session, _probe) = ScriptedSession::succeeding();
    let main = Arc::new(ManualDispatcher::new());
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::clone(&main) as Arc<dyn Dispatcher>,
        Arc::new(ImmediateDispatcher::new()),
        GeneratorOptions::new(),
    );
    let first = Recorder::new();
    generator.set_delegate(&first);

    generator.request_thumbnails(&[1.0, 2.0]);
    assert_eq!(main.pending(), 2);

    let second = Recorder::new();
    generator.set_delegate(&second);
    main.run_next();
    generator.clear_delegate();
    main.run_next();

    assert!(first.results().is_empty());
    assert_eq!(second.times(), vec![1.0]);
}

#[test]
fn panicking_converter_is_a_conversion_failure() {
    let (session, _probe) = ScriptedSession::succeeding();
    let explode_at_two = |frame: &RawFrame| -> Option<DynamicImage> {
        if frame.data[0] == 20 {
            panic!("converter failed");
        }
        ImageConverter::new().convert(frame)
    };
    let generator = ThumbnailGenerator::new(
        session,
        explode_at_two,
        Arc::new(ImmediateDispatcher::new()),
        Arc::new(ImmediateDispatcher::new()),
        GeneratorOptions::new(),
    );
    let recorder = Recorder::new();
    generator.set_delegate(&recorder);

    generator.request_thumbnails(&[1.0, 2.0, 3.0]);
    generator.request_thumbnails(&[4.0]);

    assert_eq!(recorder.times(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(
        recorder.errors(),
        vec![None, Some(ThumbnailError::ImageConversionFailed), None, None]
    );
}

#[test]
fn dropping_the_generator_stops_the_pipeline() {
    let (generator, probe, recorder, background) = manual_generator(Script::default());

    generator.request_thumbnails(&[1.0, 2.0, 3.0]);
    background.run_ready();
    assert_eq!(probe.seeks(), vec![1.0]);

    drop(generator);
    background.run_until_idle();

    assert_eq!(probe.seeks(), vec![1.0]);
    assert!(probe.captures().is_empty());
    assert!(recorder.results().is_empty());
}

// ── Threaded dispatch ──────────────────────────────────────────────

#[test]
fn default_queues_deliver_every_result() {
    let (session, _probe) = ScriptedSession::succeeding();
    let generator = ThumbnailGenerator::with_defaults(session).unwrap();
    let (sender, receiver) = mpsc::channel();
    let delegate = Arc::new(ChannelDelegate::new(sender));
    generator.set_delegate(&delegate);

    generator.request_thumbnails(&[1.0, 2.0]);

    let times: Vec<f64> = (0..2)
        .map(|_| receiver.recv_timeout(Duration::from_secs(5)).unwrap().time())
        .collect();
    assert_eq!(times, vec![1.0, 2.0]);
}

struct ThreadReporter {
    sender: mpsc::Sender<Option<String>>,
}

impl ThumbnailDelegate for ThreadReporter {
    fn on_thumbnail_generated(&self, _image: DynamicImage, _time: f64) {
        let _ = self.sender.send(thread::current().name().map(str::to_string));
    }

    fn on_thumbnail_generation_failed(&self, _error: ThumbnailError, _time: f64) {
        let _ = self.sender.send(thread::current().name().map(str::to_string));
    }
}

struct PanicsOnce {
    panicked: AtomicBool,
    sender: mpsc::Sender<f64>,
}

impl PanicsOnce {
    fn handle(&self, time: f64) {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("delegate failed at {time}s");
        }
        let _ = self.sender.send(time);
    }
}

impl ThumbnailDelegate for PanicsOnce {
    fn on_thumbnail_generated(&self, _image: DynamicImage, time: f64) {
        self.handle(time);
    }

    fn on_thumbnail_generation_failed(&self, _error: ThumbnailError, time: f64) {
        self.handle(time);
    }
}

#[test]
fn panicking_delegate_does_not_stop_later_results() {
    let (session, _probe) = ScriptedSession::succeeding();
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::new(SerialQueue::new("thumbq-main").unwrap()),
        Arc::new(SerialQueue::new("thumbq-background").unwrap()),
        GeneratorOptions::new().with_settle_delay(Duration::from_millis(5)),
    );
    let (sender, receiver) = mpsc::channel();
    let delegate = Arc::new(PanicsOnce {
        panicked: AtomicBool::new(false),
        sender,
    });
    generator.set_delegate(&delegate);

    generator.request_thumbnails(&[1.0, 2.0, 3.0]);

    let delivered: Vec<f64> = (0..2)
        .map(|_| receiver.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(delivered, vec![2.0, 3.0]);
}

#[test]
fn serial_queue_delivery_runs_on_the_main_thread() {
    let script = Script {
        interrupt_at: vec![2.0],
        ..Script::default()
    };
    let (session, _probe) = ScriptedSession::new(script);
    let generator = ThumbnailGenerator::new(
        session,
        ImageConverter::new(),
        Arc::new(SerialQueue::new("thumbq-main").unwrap()),
        Arc::new(SerialQueue::new("thumbq-background").unwrap()),
        GeneratorOptions::new().with_settle_delay(Duration::from_millis(10)),
    );
    let (sender, receiver) = mpsc::channel();
    let delegate = Arc::new(ThreadReporter { sender });
    generator.set_delegate(&delegate);

    generator.request_thumbnails(&[1.0, 2.0]);

    for _ in 0..2 {
        let name = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("thumbq-main"));
    }
}
