//! Serial dispatcher.
//!
//! Keeps its own FIFO and hands the pool one unit at a time; the completion
//! listener of the running unit releases the next one.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{DispatchContext, Dispatcher, DispatcherCore};
use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::task::{DispatchStatus, Priority, TaskUnit};

struct SerialQueue {
    waiting: VecDeque<Arc<TaskUnit>>,
    /// A unit of this dispatcher is queued in the pool or executing.
    running: bool,
}

struct SerialInner {
    core: DispatcherCore,
    queue: Mutex<SerialQueue>,
}

impl SerialInner {
    /// Pop the next unit, or mark the dispatcher idle.
    fn next_or_idle(&self) -> Option<Arc<TaskUnit>> {
        let mut queue = self.queue.lock();
        let next = queue.waiting.pop_front();
        if next.is_none() {
            queue.running = false;
        }
        next
    }

    /// Hand `unit` to the pool. A rejected unit is skipped and the queue
    /// keeps moving, so units behind it are not stranded.
    fn launch(
        self: &Arc<Self>,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<()> {
        let mut unit = unit;
        let mut first_error = None;
        loop {
            let this = self.clone();
            unit.add_listener(move |_| this.advance());
            match self.core.pool().execute(unit) {
                Ok(()) => break,
                Err(e) => {
                    first_error.get_or_insert(e);
                    match self.next_or_idle() {
                        Some(next) => unit = next,
                        None => break,
                    }
                },
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn advance(self: &Arc<Self>) {
        if let Some(next) = self.next_or_idle() {
            if let Err(e) = self.launch(next) {
                warn!(dispatcher = %self.core.tag().name, error = %e, "serial task rejected");
            }
        }
    }
}

/// Dispatcher that runs at most one unit at a time, in submission order.
#[derive(Clone)]
pub struct SerialDispatcher {
    inner: Arc<SerialInner>,
}

impl fmt::Debug for SerialDispatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SerialDispatcher")
            .field("name", &self.inner.core.tag().name)
            .field("priority", &self.inner.core.priority())
            .field("waiting", &self.waiting_count())
            .finish()
    }
}

/// Non-owning reference to a [`SerialDispatcher`].
#[derive(Clone)]
pub(crate) struct WeakSerialDispatcher {
    inner: Weak<SerialInner>,
}

impl WeakSerialDispatcher {
    pub(crate) fn upgrade(&self) -> Option<SerialDispatcher> {
        self.inner.upgrade().map(|inner| SerialDispatcher { inner })
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl SerialDispatcher {
    pub fn new(
        name: &str,
        priority: Priority,
        context: DispatchContext,
    ) -> Self {
        Self {
            inner: Arc::new(SerialInner {
                core: DispatcherCore::new(name, priority, context),
                queue: Mutex::new(SerialQueue {
                    waiting: VecDeque::new(),
                    running: false,
                }),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakSerialDispatcher {
        WeakSerialDispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Units held in this dispatcher's queue, not yet handed to the pool.
    pub fn waiting_count(&self) -> usize {
        self.inner.queue.lock().waiting.len()
    }

    /// Drop every unit still held in the queue.
    ///
    /// Used after the pool has been stopped: no listener of those units runs,
    /// but blocked synchronous submitters are released.
    pub fn discard_waiting(&self) -> usize {
        let drained: Vec<_> = {
            let mut queue = self.inner.queue.lock();
            queue.running = false;
            queue.waiting.drain(..).collect()
        };
        for unit in &drained {
            unit.discard();
        }
        if !drained.is_empty() {
            debug!(
                dispatcher = %self.inner.core.tag().name,
                count = drained.len(),
                "discarded waiting serial tasks"
            );
        }
        drained.len()
    }
}

impl Dispatcher for SerialDispatcher {
    fn core(&self) -> &DispatcherCore {
        &self.inner.core
    }

    fn submit(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        // A forced shutdown may have dropped the running unit, in which case
        // nothing would ever release the queue again.
        if !self.inner.core.pool().is_accepting() {
            unit.discard();
            return Err(DispatchError::terminated(unit.sequence()));
        }
        {
            let mut queue = self.inner.queue.lock();
            if queue.running {
                queue.waiting.push_back(unit);
                return Ok(DispatchStatus::Executed);
            }
            queue.running = true;
        }
        self.inner.launch(unit)?;
        Ok(DispatchStatus::Executed)
    }

    /// Submission order already puts a barrier after all earlier units.
    fn submit_barrier(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        self.submit(unit)
    }

    fn check_blocking(
        &self,
        _barrier: bool,
    ) -> DispatchResult<()> {
        if self.inner.core.on_own_thread() {
            return Err(DispatchError::RecursiveSync(self.name().to_string()));
        }
        Ok(())
    }

    fn to_shared(&self) -> Arc<dyn Dispatcher> {
        Arc::new(self.clone())
    }
}
