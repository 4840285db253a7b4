//! Concurrent dispatcher with barrier support.

use std::fmt;
use std::sync::Arc;

use super::{DispatchContext, Dispatcher, DispatcherCore};
use crate::runtime::barrier::{Interceptor, OrderingBarrier};
use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::task::{DispatchStatus, Priority, TaskUnit};

struct ConcurrentInner {
    core: DispatcherCore,
    barrier: Arc<OrderingBarrier>,
}

/// Dispatcher whose units may run in parallel on the shared pool.
#[derive(Clone)]
pub struct ConcurrentDispatcher {
    inner: Arc<ConcurrentInner>,
}

impl fmt::Debug for ConcurrentDispatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ConcurrentDispatcher")
            .field("name", &self.inner.core.tag().name)
            .field("priority", &self.inner.core.priority())
            .field("barrier", &self.inner.barrier)
            .finish()
    }
}

impl ConcurrentDispatcher {
    pub fn new(
        name: &str,
        priority: Priority,
        context: DispatchContext,
    ) -> Self {
        let core = DispatcherCore::new(name, priority, context);
        let barrier = OrderingBarrier::new(core.tag().name.clone(), core.pool().clone());
        Self {
            inner: Arc::new(ConcurrentInner { core, barrier }),
        }
    }

    /// The dispatcher's barrier, for inspection.
    pub fn barrier(&self) -> &Arc<OrderingBarrier> {
        &self.inner.barrier
    }
}

impl Dispatcher for ConcurrentDispatcher {
    fn core(&self) -> &DispatcherCore {
        &self.inner.core
    }

    fn submit(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        let barrier = &self.inner.barrier;
        match barrier.intercept(&unit) {
            DispatchStatus::Intercepted => Ok(DispatchStatus::Intercepted),
            DispatchStatus::Executed => {
                self.inner.core.pool().execute(unit).inspect_err(|_| {
                    barrier.cancel_admission();
                })?;
                Ok(DispatchStatus::Executed)
            },
        }
    }

    fn submit_barrier(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        self.inner.barrier.add_barrier(unit)
    }

    /// From one of this dispatcher's own units, the unit is admitted only
    /// while no barrier is pending.
    fn submit_blocking(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        if !self.inner.core.on_own_thread() {
            return self.submit(unit);
        }
        let barrier = &self.inner.barrier;
        if !barrier.admit_nested(&unit) {
            unit.discard();
            return Err(DispatchError::RecursiveSync(self.name().to_string()));
        }
        self.inner.core.pool().execute(unit).inspect_err(|_| {
            barrier.cancel_admission();
        })?;
        Ok(DispatchStatus::Executed)
    }

    /// A blocking barrier from one of this dispatcher's own units would wait
    /// for itself.
    fn check_blocking(
        &self,
        barrier: bool,
    ) -> DispatchResult<()> {
        if barrier && self.inner.core.on_own_thread() {
            return Err(DispatchError::RecursiveSync(self.name().to_string()));
        }
        Ok(())
    }

    fn to_shared(&self) -> Arc<dyn Dispatcher> {
        Arc::new(self.clone())
    }
}
