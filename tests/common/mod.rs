//! Scripted in-memory decoder sessions and recording delegates shared by the
//! integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;

use image::DynamicImage;
use thumbq::{
    PixelLayout, RawFrame, ReadyCallback, SeekCompletion, ThumbnailDelegate, ThumbnailError,
    ThumbnailResult, VideoSession,
};

/// What the session did, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Seek(f64),
    Capture(f64),
}

/// Per-time failure script for a [`ScriptedSession`].
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Seeks to these times report `finished = false`.
    pub interrupt_at: Vec<f64>,
    /// Captures at these times return no frame.
    pub no_frame_at: Vec<f64>,
    /// Captures at these times return a frame too short to convert.
    pub corrupt_frame_at: Vec<f64>,
    /// Hold seek completions until the test releases them.
    pub deferred: bool,
    /// Wait for the test to signal readiness.
    pub manual_ready: bool,
}

#[derive(Default)]
struct Shared {
    events: Vec<Event>,
    seeks_in_flight: usize,
    max_seeks_in_flight: usize,
    pending_completions: Vec<(f64, SeekCompletion)>,
    ready: Option<ReadyCallback>,
}

/// Handle the test keeps to inspect and drive a [`ScriptedSession`].
#[derive(Clone, Default)]
pub struct SessionProbe {
    shared: Arc<Mutex<Shared>>,
}

impl SessionProbe {
    pub fn events(&self) -> Vec<Event> {
        self.shared.lock().unwrap().events.clone()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Seek(time) => Some(time),
                Event::Capture(_) => None,
            })
            .collect()
    }

    pub fn captures(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Capture(time) => Some(time),
                Event::Seek(_) => None,
            })
            .collect()
    }

    /// Largest number of seeks that were issued but not yet resolved.
    pub fn max_seeks_in_flight(&self) -> usize {
        self.shared.lock().unwrap().max_seeks_in_flight
    }

    pub fn pending_completions(&self) -> usize {
        self.shared.lock().unwrap().pending_completions.len()
    }

    /// Resolve the oldest held seek. Returns the time it was for.
    pub fn complete_next(&self, finished: bool) -> Option<f64> {
        let (time, completion) = {
            let mut shared = self.shared.lock().unwrap();
            if shared.pending_completions.is_empty() {
                return None;
            }
            shared.pending_completions.remove(0)
        };
        completion(finished);
        Some(time)
    }

    /// Fire the readiness callback, if one is registered and unfired.
    pub fn signal_ready(&self) -> bool {
        let callback = self.shared.lock().unwrap().ready.take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

/// A [`VideoSession`] whose behaviour is fixed by a [`Script`].
pub struct ScriptedSession {
    script: Script,
    probe: SessionProbe,
}

impl ScriptedSession {
    pub fn new(script: Script) -> (Self, SessionProbe) {
        let probe = SessionProbe::default();
        let session = Self {
            script,
            probe: probe.clone(),
        };
        (session, probe)
    }

    pub fn succeeding() -> (Self, SessionProbe) {
        Self::new(Script::default())
    }
}

fn contains(times: &[f64], time: f64) -> bool {
    times.iter().any(|candidate| (candidate - time).abs() < 1e-9)
}

/// A 2x2 RGB frame whose pixels encode `time`, so images are distinguishable.
pub fn frame_for(time: f64) -> RawFrame {
    let value = ((time * 10.0) as u64 % 256) as u8;
    RawFrame::packed(2, 2, PixelLayout::Rgb8, vec![value; 12])
}

impl VideoSession for ScriptedSession {
    fn seek(
        &mut self,
        time: f64,
        _tolerance_before: f64,
        _tolerance_after: f64,
        completion: SeekCompletion,
    ) {
        let finished = !contains(&self.script.interrupt_at, time);
        {
            let mut shared = self.probe.shared.lock().unwrap();
            shared.events.push(Event::Seek(time));
            shared.seeks_in_flight += 1;
            shared.max_seeks_in_flight = shared.max_seeks_in_flight.max(shared.seeks_in_flight);
        }

        let probe = self.probe.clone();
        let completion: SeekCompletion = Box::new(move |finished| {
            probe.shared.lock().unwrap().seeks_in_flight -= 1;
            completion(finished);
        });

        if self.script.deferred {
            self.probe
                .shared
                .lock()
                .unwrap()
                .pending_completions
                .push((time, completion));
        } else {
            completion(finished);
        }
    }

    fn capture_frame(&mut self, time: f64) -> Option<RawFrame> {
        self.probe
            .shared
            .lock()
            .unwrap()
            .events
            .push(Event::Capture(time));

        if contains(&self.script.no_frame_at, time) {
            return None;
        }
        if contains(&self.script.corrupt_frame_at, time) {
            return Some(RawFrame::packed(4, 4, PixelLayout::Rgb8, vec![0; 3]));
        }
        Some(frame_for(time))
    }

    fn on_ready_to_play(&mut self, callback: ReadyCallback) {
        if self.script.manual_ready {
            self.probe.shared.lock().unwrap().ready = Some(callback);
        } else {
            callback();
        }
    }
}

/// A delegate that records every result and the thread it arrived on.
#[derive(Default)]
pub struct Recorder {
    results: Mutex<Vec<ThumbnailResult>>,
    threads: Mutex<Vec<Option<String>>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn results(&self) -> Vec<ThumbnailResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn times(&self) -> Vec<f64> {
        self.results().iter().map(ThumbnailResult::time).collect()
    }

    pub fn errors(&self) -> Vec<Option<ThumbnailError>> {
        self.results().iter().map(ThumbnailResult::error).collect()
    }

    pub fn threads(&self) -> Vec<Option<String>> {
        self.threads.lock().unwrap().clone()
    }

    fn record(&self, result: ThumbnailResult) {
        self.threads
            .lock()
            .unwrap()
            .push(thread::current().name().map(str::to_string));
        self.results.lock().unwrap().push(result);
    }
}

impl ThumbnailDelegate for Recorder {
    fn on_thumbnail_generated(&self, image: DynamicImage, time: f64) {
        self.record(ThumbnailResult::Generated { image, time });
    }

    fn on_thumbnail_generation_failed(&self, error: ThumbnailError, time: f64) {
        self.record(ThumbnailResult::Failed { error, time });
    }
}
