//! Priority-scoped shared dispatcher.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::{DispatchContext, Dispatcher, DispatcherCore};
use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::task::{DispatchStatus, Priority, TaskUnit};

/// Concurrent dispatcher shared by every caller of one priority.
///
/// Barriers are not available: the dispatcher has no owner who could
/// reason about "all prior work".
#[derive(Clone)]
pub struct GlobalDispatcher {
    core: Arc<DispatcherCore>,
}

impl fmt::Debug for GlobalDispatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("GlobalDispatcher")
            .field("name", &self.core.tag().name)
            .field("priority", &self.core.priority())
            .finish()
    }
}

impl GlobalDispatcher {
    /// Name given to the dispatcher of `priority`.
    pub fn name_for(priority: Priority) -> String {
        format!("GlobalDispatcher-{}", priority)
    }

    pub fn new(
        priority: Priority,
        context: DispatchContext,
    ) -> Self {
        Self {
            core: Arc::new(DispatcherCore::new(
                &Self::name_for(priority),
                priority,
                context,
            )),
        }
    }
}

impl Dispatcher for GlobalDispatcher {
    fn core(&self) -> &DispatcherCore {
        &self.core
    }

    fn submit(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        self.core.pool().execute(unit)?;
        Ok(DispatchStatus::Executed)
    }

    fn submit_barrier(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        warn!(dispatcher = %self.name(), "barrier requested on a global dispatcher");
        unit.discard();
        Err(DispatchError::BarrierUnsupported(self.name().to_string()))
    }

    fn to_shared(&self) -> Arc<dyn Dispatcher> {
        Arc::new(self.clone())
    }
}
