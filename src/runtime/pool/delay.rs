//! Delay/guard thread.
//!
//! Holds callables until their due time and runs them on a single auxiliary
//! thread. Entries are ordered by due time, then by arrival, so callables
//! scheduled with a non-positive delay run in the order they were submitted.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::task::Runnable;

struct DelayEntry {
    due: Instant,
    arrival: u64,
    callable: Runnable,
}

impl PartialEq for DelayEntry {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.due == other.due && self.arrival == other.arrival
    }
}

impl Eq for DelayEntry {}

impl PartialOrd for DelayEntry {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayEntry {
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.due
            .cmp(&other.due)
            .then(self.arrival.cmp(&other.arrival))
    }
}

#[derive(Default)]
struct DelayState {
    heap: BinaryHeap<Reverse<DelayEntry>>,
    next_arrival: u64,
    stopped: bool,
}

#[derive(Default)]
struct DelayShared {
    state: Mutex<DelayState>,
    wake: Condvar,
}

/// Timer queue served by the guard thread.
pub(crate) struct DelayQueue {
    shared: Arc<DelayShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DelayQueue {
    /// Start the guard thread.
    pub(crate) fn start(name: String) -> DispatchResult<Self> {
        let shared = Arc::new(DelayShared::default());
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Self::guard_loop(&worker))
            .map_err(|e| DispatchError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Queue `callable` to run no earlier than `delay_ms` from now.
    pub(crate) fn schedule(
        &self,
        callable: Runnable,
        delay_ms: i64,
    ) -> bool {
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let mut state = self.shared.state.lock();
        if state.stopped {
            return false;
        }
        let arrival = state.next_arrival;
        state.next_arrival += 1;
        state.heap.push(Reverse(DelayEntry {
            due: Instant::now() + delay,
            arrival,
            callable,
        }));
        self.shared.wake.notify_one();
        true
    }

    /// Number of callables waiting for their due time.
    pub(crate) fn len(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stop the guard thread, discarding anything still waiting.
    pub(crate) fn stop(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.heap)
        };
        self.shared.wake.notify_all();
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "discarding delayed tasks");
        }
        drop(discarded);

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("delay guard thread panicked");
            }
        }
    }

    fn guard_loop(shared: &DelayShared) {
        let mut state = shared.state.lock();
        loop {
            if state.stopped {
                break;
            }
            let due = match state.heap.peek() {
                Some(Reverse(entry)) => entry.due,
                None => {
                    shared.wake.wait(&mut state);
                    continue;
                },
            };
            if due > Instant::now() {
                shared.wake.wait_until(&mut state, due);
                continue;
            }
            if let Some(Reverse(entry)) = state.heap.pop() {
                MutexGuard::unlocked(&mut state, || {
                    if panic::catch_unwind(AssertUnwindSafe(entry.callable)).is_err() {
                        warn!("delayed callable panicked");
                    }
                });
            }
        }
        debug!("delay guard thread exiting");
    }
}

impl Drop for DelayQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
