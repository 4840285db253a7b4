//! Schedulable units of work.
//!
//! A [`TaskUnit`] wraps one callable together with its priority, a
//! process-wide sequence number and the tag of the dispatcher that created it.
//! Units move `Pending -> Running -> Done` exactly once, or `Pending ->
//! Revoked` when a [`RevocableHandle`] wins the race against the worker.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{error, warn};

/// A callable submitted to a dispatcher.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Callback fired once a unit reaches a terminal state.
pub type Listener = Box<dyn FnOnce(TaskOutcome) + Send + 'static>;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CURRENT_OWNER: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Id of the dispatcher whose unit is executing on this thread, if any.
pub(crate) fn current_owner() -> Option<u64> {
    CURRENT_OWNER.with(|c| c.get())
}

/// Lane priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low = 0,
    /// Normal priority (default).
    #[default]
    Default = 1,
    /// Latency-sensitive work.
    High = 2,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Default, Priority::Low];

    /// Index of the worker-pool lane for this priority.
    #[inline]
    pub fn lane(self) -> usize {
        self as usize
    }

    /// Lower-case name used in thread names and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Default => "default",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting to be picked up by a worker.
    Pending,
    /// The callable is executing.
    Running,
    /// The callable returned (or panicked), or the unit was discarded.
    Done,
    /// Revoked before it started.
    Revoked,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Done,
            _ => TaskState::Revoked,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the state is final.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Revoked)
    }
}

/// How a unit finished, as seen by its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The callable ran to completion.
    Completed,
    /// The callable panicked; the worker survived.
    Panicked,
    /// The unit was revoked and its callable skipped.
    Revoked,
    /// The pool dropped the unit without running it.
    Discarded,
}

/// Whether a submission went straight to the pool or was absorbed by an interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchStatus {
    /// Handed to the worker pool (or to a pinned worker).
    #[default]
    Executed,
    /// Held back by an interceptor, such as an active barrier.
    Intercepted,
}

/// Identity of the dispatcher that created a unit.
///
/// A plain id/name pair captured at submission time; it never keeps the
/// dispatcher alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherTag {
    /// Unique dispatcher id.
    pub id: u64,
    /// Dispatcher name.
    pub name: Arc<str>,
}

impl DispatcherTag {
    /// Tag used for units submitted straight to a pool.
    pub fn detached() -> Self {
        Self {
            id: 0,
            name: Arc::from("detached"),
        }
    }
}

/// One-shot latch released when a waitable unit finishes.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    outcome: Mutex<Option<TaskOutcome>>,
    cond: Condvar,
}

impl CompletionLatch {
    fn release(
        &self,
        outcome: TaskOutcome,
    ) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.cond.notify_all();
        }
    }

    /// Block until released.
    pub fn wait(&self) -> TaskOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            self.cond.wait(&mut slot);
        }
    }

    /// Block until released or `timeout` elapses.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<TaskOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        *slot
    }
}

struct ListenerSet {
    fired: Option<TaskOutcome>,
    pending: SmallVec<[Listener; 2]>,
}

/// A schedulable item.
pub struct TaskUnit {
    sequence: u64,
    priority: Priority,
    owner: DispatcherTag,
    state: AtomicU8,
    runnable: Mutex<Option<Runnable>>,
    listeners: Mutex<ListenerSet>,
    latch: Option<Arc<CompletionLatch>>,
}

impl fmt::Debug for TaskUnit {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskUnit")
            .field("sequence", &self.sequence)
            .field("priority", &self.priority)
            .field("owner", &self.owner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskUnit {
    fn build(
        runnable: Runnable,
        priority: Priority,
        owner: DispatcherTag,
        latch: Option<Arc<CompletionLatch>>,
    ) -> Self {
        Self {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            priority,
            owner,
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            runnable: Mutex::new(Some(runnable)),
            listeners: Mutex::new(ListenerSet {
                fired: None,
                pending: SmallVec::new(),
            }),
            latch,
        }
    }

    /// Create a fire-and-forget unit.
    pub fn new(
        runnable: Runnable,
        priority: Priority,
        owner: DispatcherTag,
    ) -> Arc<Self> {
        Arc::new(Self::build(runnable, priority, owner, None))
    }

    /// Create a unit the submitter can block on.
    pub fn waitable(
        runnable: Runnable,
        priority: Priority,
        owner: DispatcherTag,
    ) -> WaitableTaskUnit {
        let latch = Arc::new(CompletionLatch::default());
        let unit = Arc::new(Self::build(runnable, priority, owner, Some(latch.clone())));
        WaitableTaskUnit { unit, latch }
    }

    /// Process-wide sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Lane priority.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Tag of the creating dispatcher.
    #[inline]
    pub fn owner(&self) -> &DispatcherTag {
        &self.owner
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Register a completion listener.
    ///
    /// Listeners run in registration order on the thread that finishes the
    /// unit. A listener added after completion runs immediately.
    pub fn add_listener<F>(
        &self,
        listener: F,
    ) where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        let mut set = self.listeners.lock();
        match set.fired {
            Some(outcome) => {
                drop(set);
                self.notify(Box::new(listener), outcome);
            },
            None => set.pending.push(Box::new(listener)),
        }
    }

    /// Prevent a pending unit from running. Returns whether this call revoked it.
    pub fn revoke(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Pending.as_u8(),
                TaskState::Revoked.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Execute the unit on the current thread and fire its listeners.
    ///
    /// A revoked unit skips its callable but still notifies listeners.
    pub fn run(&self) -> TaskOutcome {
        let claimed = self
            .state
            .compare_exchange(
                TaskState::Pending.as_u8(),
                TaskState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        let outcome = if claimed {
            let runnable = self.runnable.lock().take();
            let previous = CURRENT_OWNER.with(|c| c.replace(Some(self.owner.id)));
            let result = match runnable {
                Some(runnable) => panic::catch_unwind(AssertUnwindSafe(runnable)),
                None => Ok(()),
            };
            CURRENT_OWNER.with(|c| c.set(previous));
            self.state.store(TaskState::Done.as_u8(), Ordering::SeqCst);
            match result {
                Ok(()) => TaskOutcome::Completed,
                Err(_) => {
                    warn!(
                        sequence = self.sequence,
                        dispatcher = %self.owner.name,
                        "task panicked"
                    );
                    TaskOutcome::Panicked
                },
            }
        } else if self.state() == TaskState::Revoked {
            self.runnable.lock().take();
            TaskOutcome::Revoked
        } else {
            warn!(sequence = self.sequence, "task already executed, ignoring");
            return TaskOutcome::Discarded;
        };

        self.finish(outcome);
        outcome
    }

    /// Drop the unit without running it or firing listeners.
    ///
    /// Used when the pool cannot accept it; only a waiting submitter is woken.
    pub fn discard(&self) {
        if !self.state().is_terminal() {
            self.state.store(TaskState::Done.as_u8(), Ordering::SeqCst);
        }
        self.runnable.lock().take();
        {
            let mut set = self.listeners.lock();
            set.fired.get_or_insert(TaskOutcome::Discarded);
            set.pending.clear();
        }
        if let Some(latch) = &self.latch {
            latch.release(TaskOutcome::Discarded);
        }
    }

    fn finish(
        &self,
        outcome: TaskOutcome,
    ) {
        let listeners = {
            let mut set = self.listeners.lock();
            set.fired = Some(outcome);
            std::mem::take(&mut set.pending)
        };
        for listener in listeners {
            self.notify(listener, outcome);
        }
        if let Some(latch) = &self.latch {
            latch.release(outcome);
        }
    }

    /// Run one listener; a panic is logged and does not reach the worker.
    fn notify(
        &self,
        listener: Listener,
        outcome: TaskOutcome,
    ) {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
            error!(
                sequence = self.sequence,
                dispatcher = %self.owner.name,
                ?outcome,
                "task listener panicked"
            );
        }
    }
}

/// A [`TaskUnit`] whose submitter blocks until it finishes.
#[derive(Debug, Clone)]
pub struct WaitableTaskUnit {
    unit: Arc<TaskUnit>,
    latch: Arc<CompletionLatch>,
}

impl WaitableTaskUnit {
    /// The underlying unit.
    #[inline]
    pub fn unit(&self) -> &Arc<TaskUnit> {
        &self.unit
    }

    /// Block until the unit finishes.
    pub fn wait(&self) -> TaskOutcome {
        self.latch.wait()
    }

    /// Block until the unit finishes or `timeout` elapses.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<TaskOutcome> {
        self.latch.wait_timeout(timeout)
    }
}

/// Cancellation token for a submitted unit.
#[derive(Debug, Clone)]
pub struct RevocableHandle {
    target: Weak<TaskUnit>,
    sequence: u64,
    status: DispatchStatus,
}

impl RevocableHandle {
    /// Create a handle for `unit`.
    pub fn new(
        unit: &Arc<TaskUnit>,
        status: DispatchStatus,
    ) -> Self {
        Self {
            target: Arc::downgrade(unit),
            sequence: unit.sequence(),
            status,
        }
    }

    /// Best-effort cancellation. Returns `true` only if the unit had not started.
    pub fn revoke(&self) -> bool {
        self.target.upgrade().is_some_and(|unit| unit.revoke())
    }

    /// Sequence number of the target unit.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// How the submission was routed.
    #[inline]
    pub fn status(&self) -> DispatchStatus {
        self.status
    }

    /// State of the target, or `None` once the unit has been released.
    pub fn state(&self) -> Option<TaskState> {
        self.target.upgrade().map(|unit| unit.state())
    }
}
