//! Dispatch registry
//!
//! Owns the worker pool and hands out dispatchers. Global dispatchers are
//! created lazily, one per priority, and never replaced; pinned dispatchers
//! are cached per name. Live serial dispatchers are tracked weakly for
//! diagnostics.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::runtime::dispatcher::{
    ConcurrentDispatcher, DispatchContext, Dispatcher, GlobalDispatcher, LogTracer,
    PinnedDispatcher, SerialDispatcher, WeakSerialDispatcher,
};
use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::pool::{WorkerPool, WorkerStats};
use crate::runtime::task::Priority;
use crate::util::config::DispatchConfig;

/// Entry point for obtaining dispatchers.
pub struct DispatchRegistry {
    config: DispatchConfig,
    context: DispatchContext,
    /// Indexed by [`Priority::lane`].
    globals: [OnceCell<GlobalDispatcher>; 3],
    pinned: Mutex<HashMap<String, PinnedDispatcher>>,
    serials: Mutex<Vec<WeakSerialDispatcher>>,
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("pool", &self.context.pool)
            .field("serials", &self.serials.lock().len())
            .field("pinned", &self.pinned.lock().len())
            .finish()
    }
}

impl DispatchRegistry {
    /// Start a registry and its pool from `config`.
    pub fn new(config: DispatchConfig) -> DispatchResult<Self> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::with_config(config.pool.clone())?);

        let mut context = DispatchContext::new(pool);
        context.notification_capacity = config.group.notification_capacity;
        if config.trace.enabled {
            context = context.with_tracer(Arc::new(LogTracer));
        }

        info!(
            workers = config.pool.total_workers(),
            trace = config.trace.enabled,
            "dispatch registry created"
        );
        Ok(Self {
            config,
            context,
            globals: Default::default(),
            pinned: Mutex::new(HashMap::new()),
            serials: Mutex::new(Vec::new()),
        })
    }

    /// Registry with the default configuration.
    pub fn with_defaults() -> DispatchResult<Self> {
        Self::new(DispatchConfig::default())
    }

    #[inline]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The shared pool.
    #[inline]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.context.pool
    }

    /// Context handed to every dispatcher this registry creates.
    #[inline]
    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    fn ensure_running(&self) -> DispatchResult<()> {
        if self.context.pool.is_accepting() {
            Ok(())
        } else {
            Err(DispatchError::terminated(0))
        }
    }

    /// Create a serial dispatcher. An empty `name` is generated.
    pub fn create_serial_dispatcher(
        &self,
        name: &str,
        priority: Priority,
    ) -> DispatchResult<SerialDispatcher> {
        self.ensure_running()?;
        let dispatcher = SerialDispatcher::new(name, priority, self.context.clone());
        let mut serials = self.serials.lock();
        serials.retain(WeakSerialDispatcher::is_alive);
        serials.push(dispatcher.downgrade());
        Ok(dispatcher)
    }

    /// Create a concurrent dispatcher. An empty `name` is generated.
    pub fn create_concurrent_dispatcher(
        &self,
        name: &str,
        priority: Priority,
    ) -> DispatchResult<ConcurrentDispatcher> {
        self.ensure_running()?;
        Ok(ConcurrentDispatcher::new(name, priority, self.context.clone()))
    }

    /// The global dispatcher for `priority`; the same instance on every call.
    pub fn get_global_dispatcher(
        &self,
        priority: Priority,
    ) -> GlobalDispatcher {
        self.globals[priority.lane()]
            .get_or_init(|| {
                debug!(%priority, "creating global dispatcher");
                GlobalDispatcher::new(priority, self.context.clone())
            })
            .clone()
    }

    /// The pinned dispatcher called `name`, started on first use.
    ///
    /// A cached dispatcher keeps the priority it was created with.
    pub fn get_pinned_dispatcher(
        &self,
        name: &str,
        priority: Priority,
    ) -> DispatchResult<PinnedDispatcher> {
        self.ensure_running()?;
        let mut pinned = self.pinned.lock();
        if let Some(existing) = pinned.get(name) {
            return Ok(existing.clone());
        }
        let dispatcher = PinnedDispatcher::new(name, priority, self.context.clone())?;
        pinned.insert(name.to_string(), dispatcher.clone());
        Ok(dispatcher)
    }

    /// Serial dispatcher name -> units waiting in its queue.
    ///
    /// Dispatchers sharing a name are summed.
    pub fn serial_dispatchers(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        if !self.context.pool.is_accepting() {
            return sizes;
        }
        let live: Vec<SerialDispatcher> = {
            let mut serials = self.serials.lock();
            serials.retain(WeakSerialDispatcher::is_alive);
            serials.iter().filter_map(WeakSerialDispatcher::upgrade).collect()
        };
        for dispatcher in live {
            *sizes.entry(dispatcher.name().to_string()).or_insert(0) +=
                dispatcher.waiting_count();
        }
        sizes
    }

    /// Worker thread name -> units executed.
    pub fn worker_threads_info(&self) -> BTreeMap<String, u64> {
        self.context.pool.worker_threads_info()
    }

    /// Per-worker statistics.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.context.pool.worker_stats()
    }

    /// Units queued in the pool.
    pub fn pending_tasks_size(&self) -> usize {
        self.context.pool.pending_count()
    }

    /// Units the pool has finished.
    pub fn task_counter(&self) -> u64 {
        self.context.pool.completed_count()
    }

    /// Stop the pool and every pinned dispatcher.
    ///
    /// See [`WorkerPool::terminate`] for the meaning of `force`. Units left
    /// in serial queues afterwards are discarded.
    pub fn shutdown(
        &self,
        force: bool,
    ) {
        info!(force, "dispatch registry shutting down");
        let pinned: Vec<_> = self.pinned.lock().drain().map(|(_, d)| d).collect();
        for dispatcher in pinned {
            dispatcher.shutdown(force);
        }
        self.context.pool.terminate(force);
        let live: Vec<SerialDispatcher> = self
            .serials
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for dispatcher in live {
            dispatcher.discard_waiting();
        }
    }
}

impl Drop for DispatchRegistry {
    fn drop(&mut self) {
        if self.context.pool.is_accepting() {
            self.shutdown(false);
        }
    }
}
