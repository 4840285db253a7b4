//! Dispatchers
//!
//! A dispatcher is a logical queue with one ordering discipline layered over
//! the shared [`WorkerPool`]:
//!
//! - [`SerialDispatcher`]: one unit at a time, in submission order
//! - [`ConcurrentDispatcher`]: free concurrency plus an [`OrderingBarrier`]
//! - [`GlobalDispatcher`]: shared per priority, no barriers
//! - [`PinnedDispatcher`]: serial, on a private thread
//!
//! Variants only implement the submission hooks of [`Dispatcher`]
//! (`submit`, `submit_barrier`, optionally `submit_blocking` and
//! `check_blocking`); the public
//! operations are provided on top of them.
//!
//! [`OrderingBarrier`]: crate::runtime::barrier::OrderingBarrier

mod concurrent;
mod global;
mod pinned;
mod serial;

pub use concurrent::ConcurrentDispatcher;
pub use global::GlobalDispatcher;
pub use pinned::{PinnedDispatcher, PINNED_MAIN, PINNED_UI};
pub use serial::SerialDispatcher;
pub(crate) use serial::WeakSerialDispatcher;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::group::{CompletionGroup, DEFAULT_NOTIFICATION_CAPACITY};
use crate::runtime::pool::WorkerPool;
use crate::runtime::task::{
    DispatchStatus, DispatcherTag, Priority, RevocableHandle, Runnable, TaskOutcome, TaskUnit,
};

/// Indexed callable for [`Dispatcher::apply_dispatch`].
pub type IndexedTask = Arc<dyn Fn(usize) + Send + Sync + 'static>;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Submission record handed to a [`DispatchTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracePoint {
    /// Sequence number of the submitted unit.
    pub sequence: u64,
    /// Whether the caller returns before the unit runs.
    pub is_async: bool,
    /// Dispatcher name.
    pub dispatcher: Arc<str>,
    /// Operation that produced the submission.
    pub tag: &'static str,
}

/// Observer called around every submission.
///
/// Implementations must not block and cannot change the dispatch outcome.
pub trait DispatchTracer: Send + Sync {
    /// Called before the unit is handed over.
    fn before_post(
        &self,
        point: &TracePoint,
    );

    /// Called after the unit was handed over (or refused).
    fn after_post(
        &self,
        point: &TracePoint,
    );
}

/// Tracer that emits `trace!` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl DispatchTracer for LogTracer {
    fn before_post(
        &self,
        point: &TracePoint,
    ) {
        trace!(
            sequence = point.sequence,
            is_async = point.is_async,
            dispatcher = %point.dispatcher,
            tag = point.tag,
            "before post"
        );
    }

    fn after_post(
        &self,
        point: &TracePoint,
    ) {
        trace!(
            sequence = point.sequence,
            is_async = point.is_async,
            dispatcher = %point.dispatcher,
            tag = point.tag,
            "after post"
        );
    }
}

/// What a dispatcher needs from its environment.
#[derive(Clone)]
pub struct DispatchContext {
    /// Pool the dispatcher submits to.
    pub pool: Arc<WorkerPool>,
    /// Optional submission observer.
    pub tracer: Option<Arc<dyn DispatchTracer>>,
    /// Capacity of groups created by the dispatcher.
    pub notification_capacity: usize,
    /// Prefix for threads owned by pinned dispatchers.
    pub thread_name_prefix: String,
}

impl fmt::Debug for DispatchContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("pool", &self.pool)
            .field("tracer", &self.tracer.is_some())
            .field("notification_capacity", &self.notification_capacity)
            .finish()
    }
}

impl DispatchContext {
    /// Context over `pool` with default group capacity and no tracer.
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        let thread_name_prefix = pool.config().thread_name_prefix.clone();
        Self {
            pool,
            tracer: None,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            thread_name_prefix,
        }
    }

    /// Attach a tracer.
    pub fn with_tracer(
        mut self,
        tracer: Arc<dyn DispatchTracer>,
    ) -> Self {
        self.tracer = Some(tracer);
        self
    }
}

/// State common to every dispatcher variant.
pub struct DispatcherCore {
    tag: DispatcherTag,
    priority: Priority,
    context: DispatchContext,
}

impl fmt::Debug for DispatcherCore {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DispatcherCore")
            .field("id", &self.tag.id)
            .field("name", &self.tag.name)
            .field("priority", &self.priority)
            .finish()
    }
}

impl DispatcherCore {
    /// Allocate an id; an empty `name` becomes `Dispatcher-<id>`.
    pub fn new(
        name: &str,
        priority: Priority,
        context: DispatchContext,
    ) -> Self {
        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = if name.is_empty() {
            Arc::from(format!("Dispatcher-{}", id))
        } else {
            Arc::from(name)
        };
        debug!(id, name = %name, %priority, "dispatcher created");
        Self {
            tag: DispatcherTag { id, name },
            priority,
            context,
        }
    }

    #[inline]
    pub fn tag(&self) -> &DispatcherTag {
        &self.tag
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.context.pool
    }

    #[inline]
    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    /// Whether the current thread is executing a unit of this dispatcher.
    pub fn on_own_thread(&self) -> bool {
        crate::runtime::task::current_owner() == Some(self.tag.id)
    }

    fn trace<T>(
        &self,
        unit: &TaskUnit,
        is_async: bool,
        tag: &'static str,
        post: impl FnOnce() -> T,
    ) -> T {
        let Some(tracer) = &self.context.tracer else {
            return post();
        };
        let point = TracePoint {
            sequence: unit.sequence(),
            is_async,
            dispatcher: self.tag.name.clone(),
            tag,
        };
        tracer.before_post(&point);
        let result = post();
        tracer.after_post(&point);
        result
    }
}

/// Capability set shared by every dispatcher variant.
pub trait Dispatcher: Send + Sync {
    /// Shared state.
    fn core(&self) -> &DispatcherCore;

    /// Hand a regular unit to the variant's execution path.
    fn submit(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus>;

    /// Hand a barrier unit to the variant's execution path.
    fn submit_barrier(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus>;

    /// Hand a unit whose submitter blocks until it finishes.
    fn submit_blocking(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        self.submit(unit)
    }

    /// Refuse a blocking submission that could never be serviced from the
    /// current thread.
    fn check_blocking(
        &self,
        _barrier: bool,
    ) -> DispatchResult<()> {
        Ok(())
    }

    /// Type-erased, reference-counted copy of this dispatcher.
    fn to_shared(&self) -> Arc<dyn Dispatcher>;

    fn name(&self) -> &str {
        &self.core().tag().name
    }

    fn priority(&self) -> Priority {
        self.core().priority()
    }

    /// Run `task` and block until it has finished.
    fn sync_dispatch(
        &self,
        task: Runnable,
    ) -> DispatchResult<()> {
        self.check_blocking(false)?;
        let core = self.core();
        let waitable = TaskUnit::waitable(task, core.priority(), core.tag().clone());
        let unit = waitable.unit().clone();
        core.trace(&unit, false, "sync_dispatch", || {
            self.submit_blocking(unit.clone())
        })?;
        wait_for(&unit, waitable.wait())
    }

    /// Queue `task` and return immediately.
    fn async_dispatch(
        &self,
        task: Runnable,
    ) -> DispatchResult<RevocableHandle> {
        let core = self.core();
        let unit = TaskUnit::new(task, core.priority(), core.tag().clone());
        let status = core.trace(&unit, true, "async_dispatch", || self.submit(unit.clone()))?;
        Ok(RevocableHandle::new(&unit, status))
    }

    /// Queue `task` no earlier than `delay_ms` from now.
    fn delay_dispatch(
        &self,
        task: Runnable,
        delay_ms: i64,
    ) -> DispatchResult<RevocableHandle> {
        let core = self.core();
        let unit = TaskUnit::new(task, core.priority(), core.tag().clone());
        let handle = RevocableHandle::new(&unit, DispatchStatus::Executed);
        let sequence = unit.sequence();

        let target = self.to_shared();
        let delayed = unit.clone();
        let scheduled = core.trace(&unit, true, "delay_dispatch", || {
            core.pool().delay_execute(
                Box::new(move || {
                    if let Err(e) = target.submit(delayed) {
                        warn!(dispatcher = %target.name(), error = %e, "delayed task rejected");
                    }
                }),
                delay_ms,
            )
        });
        if !scheduled {
            unit.discard();
            return Err(DispatchError::terminated(sequence));
        }
        Ok(handle)
    }

    /// Run `task` as a barrier and block until it has finished.
    fn sync_dispatch_barrier(
        &self,
        task: Runnable,
    ) -> DispatchResult<()> {
        self.check_blocking(true)?;
        let core = self.core();
        let waitable = TaskUnit::waitable(task, core.priority(), core.tag().clone());
        let unit = waitable.unit().clone();
        core.trace(&unit, false, "sync_dispatch_barrier", || {
            self.submit_barrier(unit.clone())
        })?;
        wait_for(&unit, waitable.wait())
    }

    /// Queue `task` as a barrier and return immediately.
    fn async_dispatch_barrier(
        &self,
        task: Runnable,
    ) -> DispatchResult<()> {
        let core = self.core();
        let unit = TaskUnit::new(task, core.priority(), core.tag().clone());
        core.trace(&unit, true, "async_dispatch_barrier", || {
            self.submit_barrier(unit.clone())
        })?;
        Ok(())
    }

    /// New empty group sized from the dispatcher's context.
    fn create_group(&self) -> Arc<CompletionGroup> {
        Arc::new(CompletionGroup::with_capacity(
            self.core().context().notification_capacity,
        ))
    }

    /// Queue `task` as a member of `group`.
    ///
    /// The group is notified when the unit finishes, panics or is revoked.
    fn async_group_dispatch(
        &self,
        group: &Arc<CompletionGroup>,
        task: Runnable,
    ) -> DispatchResult<RevocableHandle> {
        let core = self.core();
        let unit = TaskUnit::new(task, core.priority(), core.tag().clone());
        group.associate();
        let member = group.clone();
        unit.add_listener(move |_| member.notify_done());

        match core.trace(&unit, true, "async_group_dispatch", || self.submit(unit.clone())) {
            Ok(status) => Ok(RevocableHandle::new(&unit, status)),
            Err(e) => {
                // A rejected unit never fires its listener.
                group.notify_done();
                Err(e)
            },
        }
    }

    /// Wait for `group` to drain.
    fn group_wait(
        &self,
        group: &CompletionGroup,
        timeout_ms: i64,
    ) -> bool {
        group.wait(timeout_ms)
    }

    /// Dispatch `task` on this dispatcher once `group` has drained.
    fn group_notify(
        &self,
        group: &CompletionGroup,
        task: Runnable,
    ) -> DispatchResult<()> {
        let target = self.to_shared();
        group.add_notification(Box::new(move || {
            if let Err(e) = target.async_dispatch(task) {
                warn!(dispatcher = %target.name(), error = %e, "group notification rejected");
            }
        }))
    }

    /// Queue `task(i)` for every `i` in `0..iterations`.
    ///
    /// Submissions that succeeded are not rolled back when a later one fails.
    fn apply_dispatch(
        &self,
        task: IndexedTask,
        iterations: i64,
    ) -> DispatchResult<()> {
        if iterations <= 0 {
            return Err(DispatchError::InvalidArgument(format!(
                "iterations must be positive, got {}",
                iterations
            )));
        }

        let total = iterations as usize;
        let mut failed = 0usize;
        for index in 0..total {
            let task = task.clone();
            if let Err(e) = self.async_dispatch(Box::new(move || task(index))) {
                debug!(dispatcher = %self.name(), index, error = %e, "apply iteration rejected");
                failed += 1;
            }
        }

        if failed > 0 {
            warn!(dispatcher = %self.name(), failed, total, "apply dispatch incomplete");
            return Err(DispatchError::PartialApply { failed, total });
        }
        Ok(())
    }
}

impl fmt::Debug for dyn Dispatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self.core(), f)
    }
}

/// Map the latch outcome of a blocking submission onto its result.
fn wait_for(
    unit: &TaskUnit,
    outcome: TaskOutcome,
) -> DispatchResult<()> {
    match outcome {
        TaskOutcome::Discarded => Err(DispatchError::terminated(unit.sequence())),
        TaskOutcome::Completed | TaskOutcome::Panicked | TaskOutcome::Revoked => Ok(()),
    }
}

#[cfg(test)]
mod tests;
