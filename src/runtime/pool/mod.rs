//! Shared worker pool.
//!
//! A fixed set of worker threads partitioned into one lane per [`Priority`],
//! plus one guard thread that serves delayed work. Units are FIFO within a
//! lane; lanes never borrow each other's workers.
//!
//! ```text
//! Running --terminate(false)--> Draining --(queues empty)--> Stopped
//! Running --terminate(true)-----------------------------------^
//! ```

mod delay;
mod worker;

pub use worker::WorkerStats;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::runtime::error::{DispatchError, DispatchResult, RejectReason};
use crate::runtime::task::{Priority, Runnable, TaskUnit};

use delay::DelayQueue;
use worker::WorkerSlot;

/// Hard cap on worker threads.
pub const THREAD_UPPER_LIMIT: usize = 256;
/// Minimum worker threads.
pub const THREAD_LOWER_LIMIT: usize = 1;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers serving the HIGH lane.
    pub high_workers: usize,
    /// Workers serving the DEFAULT lane.
    pub default_workers: usize,
    /// Workers serving the LOW lane.
    pub low_workers: usize,
    /// Upper bound on the sum of lane workers.
    pub max_threads: usize,
    /// Maximum queued units per lane (0 = unbounded).
    pub lane_capacity: usize,
    /// Prefix for worker and guard thread names.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            high_workers: 8,
            default_workers: 16,
            low_workers: 8,
            max_threads: 32,
            lane_capacity: 0,
            thread_name_prefix: "dispatch".to_string(),
        }
    }
}

impl PoolConfig {
    /// Workers configured for `priority`.
    pub fn workers_for(
        &self,
        priority: Priority,
    ) -> usize {
        match priority {
            Priority::High => self.high_workers,
            Priority::Default => self.default_workers,
            Priority::Low => self.low_workers,
        }
    }

    /// Total worker threads.
    pub fn total_workers(&self) -> usize {
        self.high_workers + self.default_workers + self.low_workers
    }

    /// Check thread counts against the pool limits.
    pub fn validate(&self) -> DispatchResult<()> {
        if !(THREAD_LOWER_LIMIT..=THREAD_UPPER_LIMIT).contains(&self.max_threads) {
            return Err(DispatchError::InvalidConfig(format!(
                "max_threads {} outside {}..={}",
                self.max_threads, THREAD_LOWER_LIMIT, THREAD_UPPER_LIMIT
            )));
        }
        for priority in Priority::ALL {
            if self.workers_for(priority) < THREAD_LOWER_LIMIT {
                return Err(DispatchError::InvalidConfig(format!(
                    "{} lane needs at least {} worker",
                    priority, THREAD_LOWER_LIMIT
                )));
            }
        }
        if self.total_workers() > self.max_threads {
            return Err(DispatchError::InvalidConfig(format!(
                "{} lane workers exceed max_threads {}",
                self.total_workers(),
                self.max_threads
            )));
        }
        Ok(())
    }
}

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and executing work.
    Running,
    /// Finishing queued and in-flight work before stopping.
    Draining,
    /// Terminated.
    Stopped,
}

struct PoolControl {
    state: PoolState,
    /// Units queued or executing.
    in_flight: usize,
}

struct Lane {
    priority: Priority,
    sender: Sender<Arc<TaskUnit>>,
    receiver: Receiver<Arc<TaskUnit>>,
    pending: AtomicUsize,
}

impl Lane {
    fn new(priority: Priority) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            priority,
            sender,
            receiver,
            pending: AtomicUsize::new(0),
        }
    }
}

/// State shared between the pool handle and its workers.
struct PoolShared {
    config: PoolConfig,
    control: Mutex<PoolControl>,
    drained: Condvar,
    /// Indexed by [`Priority::lane`].
    lanes: [Lane; 3],
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    completed: AtomicU64,
}

impl PoolShared {
    fn lane(
        &self,
        priority: Priority,
    ) -> &Lane {
        &self.lanes[priority.lane()]
    }

    fn is_stopped(&self) -> bool {
        self.control.lock().state == PoolState::Stopped
    }

    /// Account for one unit leaving the pool.
    fn finish_one(&self) {
        let mut control = self.control.lock();
        control.in_flight = control.in_flight.saturating_sub(1);
        if control.in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

/// Priority-partitioned worker pool.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    slots: Vec<Arc<WorkerSlot>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    delay: DelayQueue,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("state", &self.state())
            .field("workers", &self.slots.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl WorkerPool {
    /// Start a pool with the default configuration.
    pub fn new() -> DispatchResult<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Validate `config` and start all lane workers plus the guard thread.
    pub fn with_config(config: PoolConfig) -> DispatchResult<Self> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let shared = Arc::new(PoolShared {
            config: config.clone(),
            control: Mutex::new(PoolControl {
                state: PoolState::Running,
                in_flight: 0,
            }),
            drained: Condvar::new(),
            lanes: [
                Lane::new(Priority::Low),
                Lane::new(Priority::Default),
                Lane::new(Priority::High),
            ],
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            completed: AtomicU64::new(0),
        });

        let delay = DelayQueue::start(format!("{}-guard", config.thread_name_prefix))?;

        let mut pool = Self {
            shared,
            slots: Vec::with_capacity(config.total_workers()),
            workers: Mutex::new(Vec::with_capacity(config.total_workers())),
            delay,
        };

        if let Err(e) = pool.spawn_workers() {
            pool.terminate(true);
            return Err(e);
        }

        info!(
            high = config.high_workers,
            default = config.default_workers,
            low = config.low_workers,
            "worker pool started"
        );
        Ok(pool)
    }

    fn spawn_workers(&mut self) -> DispatchResult<()> {
        let prefix = self.shared.config.thread_name_prefix.clone();
        for priority in Priority::ALL {
            for index in 0..self.shared.config.workers_for(priority) {
                let name = format!("{}-{}-{}", prefix, priority, index);
                let slot = Arc::new(WorkerSlot::new(name.clone(), priority));
                let shared = self.shared.clone();
                let worker_slot = slot.clone();

                let handle = thread::Builder::new()
                    .name(name)
                    .spawn(move || worker::run(&shared, &worker_slot))
                    .map_err(|e| DispatchError::ThreadSpawn(e.to_string()))?;

                self.slots.push(slot);
                self.workers.lock().push(handle);
            }
        }
        Ok(())
    }

    /// Pool configuration.
    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.shared.control.lock().state
    }

    /// Whether new units are still accepted.
    pub fn is_accepting(&self) -> bool {
        self.state() != PoolState::Stopped
    }

    /// Enqueue `unit` on the lane matching its priority.
    ///
    /// On rejection the unit is discarded: its listeners never fire, but a
    /// submitter blocked on a waitable unit is released.
    pub fn execute(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<()> {
        let lane = self.shared.lane(unit.priority());
        let mut control = self.shared.control.lock();

        let reason = if control.state == PoolState::Stopped {
            Some(RejectReason::Terminated)
        } else if self.shared.config.lane_capacity > 0
            && lane.pending.load(Ordering::SeqCst) >= self.shared.config.lane_capacity
        {
            Some(RejectReason::QueueFull)
        } else {
            None
        };

        if let Some(reason) = reason {
            drop(control);
            warn!(sequence = unit.sequence(), %reason, "worker pool rejected task");
            unit.discard();
            return Err(DispatchError::Rejected {
                sequence: unit.sequence(),
                reason,
            });
        }

        control.in_flight += 1;
        lane.pending.fetch_add(1, Ordering::SeqCst);
        debug!(
            sequence = unit.sequence(),
            lane = %lane.priority,
            dispatcher = %unit.owner().name,
            "task enqueued"
        );
        // The pool owns the receiver, so an unbounded send cannot fail.
        let _ = lane.sender.send(unit);
        Ok(())
    }

    /// Run `callable` on the guard thread no earlier than `delay_ms` from now.
    ///
    /// Non-positive delays mean "as soon as possible", in arrival order.
    pub fn delay_execute(
        &self,
        callable: Runnable,
        delay_ms: i64,
    ) -> bool {
        if self.state() != PoolState::Running {
            debug!("delay execute refused, pool terminating");
            return false;
        }
        self.delay.schedule(callable, delay_ms)
    }

    /// Units queued on all lanes.
    pub fn pending_count(&self) -> usize {
        if self.shared.is_stopped() {
            return 0;
        }
        self.shared
            .lanes
            .iter()
            .map(|lane| lane.pending.load(Ordering::SeqCst))
            .sum()
    }

    /// Units queued on one lane.
    pub fn lane_pending(
        &self,
        priority: Priority,
    ) -> usize {
        if self.shared.is_stopped() {
            return 0;
        }
        self.shared.lane(priority).pending.load(Ordering::SeqCst)
    }

    /// Callables waiting on the guard thread.
    pub fn delayed_count(&self) -> usize {
        self.delay.len()
    }

    /// Units executed (or skipped after revocation) since the pool started.
    pub fn completed_count(&self) -> u64 {
        if self.shared.is_stopped() {
            return 0;
        }
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Snapshot of every worker.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        if self.shared.is_stopped() {
            return Vec::new();
        }
        self.slots.iter().map(|slot| slot.snapshot()).collect()
    }

    /// Worker thread name -> units executed.
    pub fn worker_threads_info(&self) -> BTreeMap<String, u64> {
        self.worker_stats()
            .into_iter()
            .map(|stats| (stats.name, stats.executed))
            .collect()
    }

    /// Stop the pool.
    ///
    /// `force = false` blocks until every queued and running unit has
    /// finished; work submitted by those units while draining is still
    /// accepted. `force = true` stops accepting immediately, discards queued
    /// units and does not wait for busy workers.
    pub fn terminate(
        &self,
        force: bool,
    ) {
        if worker::on_pool_thread() && !force {
            warn!("graceful terminate requested from a worker thread, forcing");
            return self.terminate(true);
        }

        {
            let mut control = self.shared.control.lock();
            match (control.state, force) {
                (PoolState::Stopped, _) => return,
                (PoolState::Draining, false) => {
                    while control.state != PoolState::Stopped {
                        self.shared.drained.wait(&mut control);
                    }
                    return;
                },
                (_, false) => control.state = PoolState::Draining,
                (_, true) => control.state = PoolState::Stopped,
            }
        }
        info!(force, "terminating worker pool");

        self.delay.stop();

        if !force {
            let mut control = self.shared.control.lock();
            while control.in_flight > 0 && control.state != PoolState::Stopped {
                self.shared.drained.wait(&mut control);
            }
            control.state = PoolState::Stopped;
            self.shared.drained.notify_all();
        }

        self.shared.shutdown_tx.lock().take();

        if force {
            self.discard_queued();
            // Busy workers finish their current unit on their own.
            self.workers.lock().clear();
        } else {
            let workers = std::mem::take(&mut *self.workers.lock());
            for handle in workers {
                if handle.join().is_err() {
                    warn!("worker thread panicked during shutdown");
                }
            }
        }
        info!("worker pool stopped");
    }

    fn discard_queued(&self) {
        let mut discarded = 0usize;
        for lane in &self.shared.lanes {
            while let Ok(unit) = lane.receiver.try_recv() {
                lane.pending.fetch_sub(1, Ordering::SeqCst);
                unit.discard();
                self.shared.finish_one();
                discarded += 1;
            }
        }
        if discarded > 0 {
            debug!(count = discarded, "discarded queued tasks");
        }
        self.shared.drained.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.state() != PoolState::Stopped {
            self.terminate(false);
        }
    }
}
