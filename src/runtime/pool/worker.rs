//! Lane worker loop.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::select;
use serde::Serialize;
use tracing::{debug, trace};

use super::PoolShared;
use crate::runtime::task::Priority;

thread_local! {
    static POOL_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is a pool worker.
pub(crate) fn on_pool_thread() -> bool {
    POOL_THREAD.with(|c| c.get())
}

/// Point-in-time statistics for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Thread name.
    pub name: String,
    /// Lane served.
    pub lane: Priority,
    /// Units executed so far.
    pub executed: u64,
    /// Whether a unit is executing right now.
    pub busy: bool,
}

#[derive(Debug)]
pub(crate) struct WorkerSlot {
    name: String,
    lane: Priority,
    executed: AtomicU64,
    busy: AtomicBool,
}

impl WorkerSlot {
    pub(crate) fn new(
        name: String,
        lane: Priority,
    ) -> Self {
        Self {
            name,
            lane,
            executed: AtomicU64::new(0),
            busy: AtomicBool::new(false),
        }
    }

    pub(crate) fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            name: self.name.clone(),
            lane: self.lane,
            executed: self.executed.load(Ordering::SeqCst),
            busy: self.busy.load(Ordering::SeqCst),
        }
    }
}

/// Serve one lane until the pool shuts down.
pub(super) fn run(
    shared: &PoolShared,
    slot: &WorkerSlot,
) {
    POOL_THREAD.with(|c| c.set(true));
    let lane = shared.lane(slot.lane);
    debug!(worker = %slot.name, "worker started");

    loop {
        select! {
            recv(lane.receiver) -> msg => {
                let Ok(unit) = msg else { break };
                lane.pending.fetch_sub(1, Ordering::SeqCst);

                if shared.is_stopped() {
                    unit.discard();
                    shared.finish_one();
                    continue;
                }

                slot.busy.store(true, Ordering::SeqCst);
                trace!(
                    worker = %slot.name,
                    sequence = unit.sequence(),
                    dispatcher = %unit.owner().name,
                    "running task"
                );
                let outcome = unit.run();
                trace!(sequence = unit.sequence(), ?outcome, "task finished");
                slot.busy.store(false, Ordering::SeqCst);
                slot.executed.fetch_add(1, Ordering::SeqCst);
                shared.completed.fetch_add(1, Ordering::SeqCst);
                drop(unit);
                shared.finish_one();
            },
            recv(shared.shutdown_rx) -> _ => break,
        }
    }

    debug!(worker = %slot.name, "worker exiting");
}
