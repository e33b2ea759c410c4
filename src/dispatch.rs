//! Execution contexts for the thumbnail pipeline.
//!
//! The generator never spawns threads itself. It posts work to two injected
//! [`Dispatcher`]s: a *main* context that only delivers results, and a
//! *background* context that issues seeks, waits out the settle delay and
//! captures frames. Both must run their work items one at a time.
//!
//! Three implementations are provided:
//!
//! - [`SerialQueue`] runs work on a dedicated, named worker thread. This is
//!   the production dispatcher.
//! - [`ImmediateDispatcher`] runs work synchronously on the posting thread and
//!   skips delays on a virtual clock. Work posted while it is already running
//!   is queued rather than run re-entrantly, so long pipelines do not grow the
//!   call stack.
//! - [`ManualDispatcher`] only records work; the test drives it step by step.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! use thumbq::{Dispatcher, ManualDispatcher};
//!
//! let dispatcher = ManualDispatcher::new();
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! let delayed = Arc::clone(&log);
//! dispatcher.run_after_delay(Duration::from_secs(1), Box::new(move || delayed.lock().unwrap().push("late")));
//! let immediate = Arc::clone(&log);
//! dispatcher.run_async(Box::new(move || immediate.lock().unwrap().push("early")));
//!
//! assert_eq!(dispatcher.run_until_idle(), 2);
//! assert_eq!(*log.lock().unwrap(), vec!["early", "late"]);
//! assert_eq!(dispatcher.now(), Duration::from_secs(1));
//! ```

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fmt::{Debug, Formatter, Result as FmtResult},
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::error::ThumbqError;
use crate::utilities::lock;

/// A unit of work posted to a [`Dispatcher`].
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// A serial execution context.
///
/// Implementations must never run two work items at the same time, and must
/// never run a work item from inside the `run_async`/`run_after_delay` call
/// that posted it while another item is executing on the same context.
pub trait Dispatcher: Send + Sync {
    /// Run `work` as soon as possible, after work already due.
    fn run_async(&self, work: Work);

    /// Run `work` once `delay` has elapsed.
    fn run_after_delay(&self, delay: Duration, work: Work);
}

/// Run `work`, logging and swallowing a panic so the context keeps running.
fn run_guarded(work: Work, context: &str) {
    if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
        log::warn!("Work item on {context} panicked");
    }
}

/// A work item ordered by deadline, then by posting order.
struct Scheduled<T> {
    deadline: T,
    sequence: u64,
    work: Work,
}

impl<T: Ord> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for Scheduled<T> {}

impl<T: Ord> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Min-heap of work items keyed on a virtual clock.
#[derive(Default)]
struct VirtualQueue {
    now: Duration,
    next_sequence: u64,
    heap: BinaryHeap<Reverse<Scheduled<Duration>>>,
    running: bool,
}

impl VirtualQueue {
    fn push(&mut self, delay: Duration, work: Work) {
        let entry = Scheduled {
            deadline: self.now + delay,
            sequence: self.next_sequence,
            work,
        };
        self.next_sequence += 1;
        self.heap.push(Reverse(entry));
    }

    /// Pop the earliest item, moving the clock forward to its deadline.
    fn pop(&mut self) -> Option<Work> {
        let Reverse(entry) = self.heap.pop()?;
        self.now = self.now.max(entry.deadline);
        Some(entry.work)
    }

    /// Pop the earliest item only if it is due by `limit`.
    fn pop_due(&mut self, limit: Duration) -> Option<Work> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.deadline <= limit => self.pop(),
            _ => None,
        }
    }
}

/// Synchronous dispatcher for deterministic tests and benchmarks.
///
/// Posted work runs on the calling thread before `run_async` returns, unless
/// this dispatcher is already running work, in which case the new item is
/// queued and picked up by the outer call. Delays advance a virtual clock
/// instead of sleeping; delayed items still run after every item due
/// earlier. A panicking item is logged and skipped.
#[derive(Default)]
pub struct ImmediateDispatcher {
    queue: Mutex<VirtualQueue>,
}

impl ImmediateDispatcher {
    /// Create a new immediate dispatcher with its clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position of the virtual clock.
    pub fn now(&self) -> Duration {
        lock(&self.queue).now
    }

    fn schedule(&self, delay: Duration, work: Work) {
        {
            let mut queue = lock(&self.queue);
            queue.push(delay, work);
            if queue.running {
                return;
            }
            queue.running = true;
        }

        loop {
            let next = {
                let mut queue = lock(&self.queue);
                let next = queue.pop();
                if next.is_none() {
                    queue.running = false;
                }
                next
            };
            match next {
                Some(work) => run_guarded(work, "immediate dispatcher"),
                None => break,
            }
        }
    }
}

impl Dispatcher for ImmediateDispatcher {
    fn run_async(&self, work: Work) {
        self.schedule(Duration::ZERO, work);
    }

    fn run_after_delay(&self, delay: Duration, work: Work) {
        self.schedule(delay, work);
    }
}

impl Debug for ImmediateDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let queue = lock(&self.queue);
        f.debug_struct("ImmediateDispatcher")
            .field("now", &queue.now)
            .field("pending", &queue.heap.len())
            .finish()
    }
}

/// Dispatcher that only runs work when the test tells it to.
///
/// Useful for observing the generator between pipeline steps, e.g. to append
/// requests while a seek is in flight.
#[derive(Default)]
pub struct ManualDispatcher {
    queue: Mutex<VirtualQueue>,
}

impl ManualDispatcher {
    /// Create an empty dispatcher with its clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position of the virtual clock.
    pub fn now(&self) -> Duration {
        lock(&self.queue).now
    }

    /// Number of queued work items, due or not.
    pub fn pending(&self) -> usize {
        lock(&self.queue).heap.len()
    }

    /// Run the earliest queued item, advancing the clock to its deadline if
    /// needed. Returns `false` if nothing was queued.
    pub fn run_next(&self) -> bool {
        let next = lock(&self.queue).pop();
        match next {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Run items that are due without moving the clock.
    pub fn run_ready(&self) -> usize {
        let now = self.now();
        self.run_due(now)
    }

    /// Move the clock forward by `by`, running everything that falls due on
    /// the way, in deadline order.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let count = self.run_due(target);
        let mut queue = lock(&self.queue);
        queue.now = queue.now.max(target);
        count
    }

    /// Run until no work remains, including delayed work and anything posted
    /// along the way. Returns the number of items run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }

    fn run_due(&self, limit: Duration) -> usize {
        let mut count = 0;
        loop {
            let next = lock(&self.queue).pop_due(limit);
            match next {
                Some(work) => {
                    work();
                    count += 1;
                }
                None => return count,
            }
        }
    }
}

impl Dispatcher for ManualDispatcher {
    fn run_async(&self, work: Work) {
        lock(&self.queue).push(Duration::ZERO, work);
    }

    fn run_after_delay(&self, delay: Duration, work: Work) {
        lock(&self.queue).push(delay, work);
    }
}

impl Debug for ManualDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let queue = lock(&self.queue);
        f.debug_struct("ManualDispatcher")
            .field("now", &queue.now)
            .field("pending", &queue.heap.len())
            .finish()
    }
}

#[derive(Default)]
struct SerialState {
    next_sequence: u64,
    heap: BinaryHeap<Reverse<Scheduled<Instant>>>,
    shutdown: bool,
}

struct SerialShared {
    state: Mutex<SerialState>,
    wakeup: Condvar,
}

/// A serial queue backed by one named worker thread.
///
/// Immediate work runs in posting order; delayed work runs once its deadline
/// passes, ordered by deadline. A panicking item is logged and the worker
/// moves on. Dropping the queue stops the worker after the item it is
/// currently running; queued items are discarded.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
///
/// use thumbq::{Dispatcher, SerialQueue};
///
/// let queue = SerialQueue::new("example")?;
/// let (sender, receiver) = mpsc::channel();
/// queue.run_async(Box::new(move || sender.send(42).unwrap()));
/// assert_eq!(receiver.recv().unwrap(), 42);
/// # Ok::<(), thumbq::ThumbqError>(())
/// ```
pub struct SerialQueue {
    label: String,
    shared: Arc<SerialShared>,
    worker: Option<JoinHandle<()>>,
}

impl SerialQueue {
    /// Start a queue whose worker thread is named `label`.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbqError::IoError`] if the worker thread cannot be
    /// spawned.
    pub fn new(label: impl Into<String>) -> Result<Self, ThumbqError> {
        let label = label.into();
        let shared = Arc::new(SerialShared {
            state: Mutex::new(SerialState::default()),
            wakeup: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_label = label.clone();
        let worker = thread::Builder::new()
            .name(label.clone())
            .spawn(move || run_worker(&worker_shared, &worker_label))?;

        log::debug!("Started serial queue {label}");
        Ok(Self {
            label,
            shared,
            worker: Some(worker),
        })
    }

    /// The worker thread's name.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn schedule(&self, deadline: Instant, work: Work) {
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return;
        }
        let entry = Scheduled {
            deadline,
            sequence: state.next_sequence,
            work,
        };
        state.next_sequence += 1;
        state.heap.push(Reverse(entry));
        self.shared.wakeup.notify_one();
    }
}

fn run_worker(shared: &SerialShared, label: &str) {
    let mut state = lock(&shared.state);
    loop {
        if state.shutdown {
            return;
        }

        let next_deadline = state.heap.peek().map(|Reverse(entry)| entry.deadline);
        match next_deadline {
            None => {
                state = shared
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    if let Some(Reverse(entry)) = state.heap.pop() {
                        drop(state);
                        run_guarded(entry.work, label);
                        state = lock(&shared.state);
                    }
                } else {
                    log::trace!("Serial queue idle for {:?}", deadline - now);
                    state = shared
                        .wakeup
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
            }
        }
    }
}

impl Dispatcher for SerialQueue {
    fn run_async(&self, work: Work) {
        self.schedule(Instant::now(), work);
    }

    fn run_after_delay(&self, delay: Duration, work: Work) {
        self.schedule(Instant::now() + delay, work);
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.shutdown = true;
            state.heap.clear();
            self.shared.wakeup.notify_all();
        }

        if let Some(worker) = self.worker.take() {
            // A work item may own the last handle to its own queue.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
        log::debug!("Stopped serial queue {}", self.label);
    }
}

impl Debug for SerialQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
