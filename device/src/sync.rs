//! Timeline signals.
//!
//! A timeline signal is a monotonically increasing counter. Producers advance
//! it as work completes and consumers block until it reaches a target value,
//! which gives cheap ordering between a submitting thread and the worker that
//! drains a command queue.
//!
//! ```ignore
//! let signal = CpuTimelineSignal::new();
//!
//! // worker
//! signal.set(1);
//!
//! // submitter
//! signal.wait(1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

pub trait TimelineSignal: Send + Sync + std::fmt::Debug {
    fn value(&self) -> u64;

    /// Advance the signal. Values lower than the current one are ignored.
    fn set(&self, value: u64);

    /// Block until the signal reaches `value`.
    fn wait(&self, value: u64);

    fn is_reached(&self, value: u64) -> bool {
        self.value() >= value
    }
}

/// Timeline signal backed by an atomic counter and a condvar.
#[derive(Debug)]
pub struct CpuTimelineSignal {
    value: AtomicU64,
    /// Guards nothing; pairs with the condvar.
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Default for CpuTimelineSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuTimelineSignal {
    pub fn new() -> Self {
        Self::with_initial(0)
    }

    pub fn with_initial(initial: u64) -> Self {
        Self { value: AtomicU64::new(initial), mutex: Mutex::new(()), condvar: Condvar::new() }
    }
}

impl TimelineSignal for CpuTimelineSignal {
    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        // Taking the lock orders the store against a waiter between its check and its park.
        let _guard = self.mutex.lock();
        self.value.fetch_max(value, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    fn wait(&self, target: u64) {
        if self.is_reached(target) {
            return;
        }

        let mut guard = self.mutex.lock();
        while !self.is_reached(target) {
            self.condvar.wait(&mut guard);
        }
    }
}
