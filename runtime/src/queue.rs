//! Command queues.
//!
//! A [`CommandQueue`] owns one worker thread that runs submitted tasks in
//! strict FIFO order. Submission returns immediately; completion is tracked
//! with a timeline signal advanced to each task's sequence number, so
//! [`CommandQueue::finish`] and [`Event::wait`] are plain signal waits.
//!
//! Queues are independent of each other. An ordering between queues exists
//! only where one queue waits on an [`Event`] recorded on another.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tessera_device::{CpuTimelineSignal, TimelineSignal};

use crate::error::{Error, Result};

/// Concurrent command queues a session may open.
pub const MAX_QUEUES: usize = 2;

/// Unit of work executed on a queue's worker.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Completion marker of a point in a queue's submission order.
#[derive(Debug, Clone)]
pub struct Event {
    queue: usize,
    value: u64,
    signal: Arc<CpuTimelineSignal>,
}

impl Event {
    /// Queue the event was recorded on.
    pub fn queue(&self) -> usize {
        self.queue
    }

    /// Sequence number the queue must complete for the event to fire.
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_complete(&self) -> bool {
        self.signal.is_reached(self.value)
    }

    /// Block until every task submitted before the event has completed.
    pub fn wait(&self) {
        self.signal.wait(self.value);
    }
}

enum JobKind {
    Run(Task),
    WaitFor(Event),
}

struct Job {
    seq: u64,
    kind: JobKind,
}

#[derive(Default)]
struct State {
    jobs: VecDeque<Job>,
    /// Sequence number of the last submitted job.
    submitted: u64,
    shutdown: bool,
}

struct Shared {
    id: usize,
    state: Mutex<State>,
    available: Condvar,
    completed: Arc<CpuTimelineSignal>,
    /// First task failure since the last `finish`.
    first_error: Mutex<Option<Error>>,
}

pub struct CommandQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.shared.id)
            .field("submitted", &self.shared.state.lock().submitted)
            .field("completed", &self.shared.completed.value())
            .finish()
    }
}

impl CommandQueue {
    pub fn new(id: usize) -> Self {
        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(State::default()),
            available: Condvar::new(),
            completed: Arc::new(CpuTimelineSignal::new()),
            first_error: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("tessera-cq{id}"))
            .spawn(move || worker_loop(&worker_shared))
            .map_err(|error| tracing::error!(%error, queue = id, "failed to spawn queue worker"))
            .ok();

        Self { shared, worker }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Enqueue `task` after everything already submitted. Returns its sequence number.
    pub fn submit(&self, task: Task) -> u64 {
        self.push(JobKind::Run(task))
    }

    /// Enqueue `task` and return an event that fires when it completes.
    pub fn submit_with_event(&self, task: Task) -> Event {
        let value = self.submit(task);
        self.event_at(value)
    }

    /// Event that fires once everything submitted so far has completed.
    pub fn record_event(&self) -> Event {
        let value = self.shared.state.lock().submitted;
        self.event_at(value)
    }

    /// Make later submissions on this queue wait for `event`.
    pub fn wait_for_event(&self, event: &Event) {
        self.push(JobKind::WaitFor(event.clone()));
    }

    /// Block until every task submitted so far has completed.
    ///
    /// Returns the first task error since the previous `finish`. Tasks after a
    /// failing one still run.
    pub fn finish(&self) -> Result<()> {
        let target = self.shared.state.lock().submitted;
        if self.worker.is_some() {
            self.shared.completed.wait(target);
        } else {
            drain(&self.shared);
        }

        match self.shared.first_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Number of tasks submitted and not yet completed.
    pub fn pending(&self) -> u64 {
        self.shared.state.lock().submitted - self.shared.completed.value()
    }

    fn event_at(&self, value: u64) -> Event {
        Event { queue: self.shared.id, value, signal: Arc::clone(&self.shared.completed) }
    }

    fn push(&self, kind: JobKind) -> u64 {
        let mut state = self.shared.state.lock();
        state.submitted += 1;
        let seq = state.submitted;
        state.jobs.push_back(Job { seq, kind });
        drop(state);

        self.shared.available.notify_one();
        tracing::trace!(queue = self.shared.id, seq, "submitted");
        seq
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.available.notify_all();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!(queue = self.shared.id, "queue worker panicked");
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.shutdown {
                    return;
                }
                shared.available.wait(&mut state);
            }
        };
        run_job(shared, job);
    }
}

/// Run queued jobs on the calling thread. Used when no worker could be spawned.
fn drain(shared: &Shared) {
    loop {
        let Some(job) = shared.state.lock().jobs.pop_front() else { return };
        run_job(shared, job);
    }
}

fn run_job(shared: &Shared, job: Job) {
    match job.kind {
        JobKind::Run(task) => {
            if let Err(error) = task() {
                tracing::warn!(queue = shared.id, seq = job.seq, %error, "task failed");
                shared.first_error.lock().get_or_insert(error);
            }
        }
        JobKind::WaitFor(event) => {
            tracing::trace!(queue = shared.id, on_queue = event.queue, value = event.value, "waiting for event");
            event.wait();
        }
    }
    shared.completed.set(job.seq);
}
