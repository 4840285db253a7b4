//! Dispatcher bound to one dedicated thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{DispatchContext, Dispatcher, DispatcherCore};
use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::task::{DispatchStatus, Priority, TaskUnit};

/// Name of the main-thread style pinned dispatcher.
pub const PINNED_MAIN: &str = "main";
/// Name of the UI-thread style pinned dispatcher.
pub const PINNED_UI: &str = "ui";

struct PinnedInner {
    core: DispatcherCore,
    sender: Mutex<Option<Sender<Arc<TaskUnit>>>>,
    /// Set by a forced shutdown; the thread drops what is left.
    discard: Arc<AtomicBool>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    thread_id: thread::ThreadId,
}

impl PinnedInner {
    fn shutdown(
        &self,
        force: bool,
    ) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        if force {
            self.discard.store(true, Ordering::SeqCst);
        }
        drop(sender);
        info!(dispatcher = %self.core.tag().name, force, "pinned dispatcher stopping");

        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if force {
                return;
            }
            if handle.join().is_err() {
                warn!(dispatcher = %self.core.tag().name, "pinned thread panicked");
            }
        }
    }
}

impl Drop for PinnedInner {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

/// Serial dispatcher that runs every unit on its own private thread.
#[derive(Clone)]
pub struct PinnedDispatcher {
    inner: Arc<PinnedInner>,
}

impl fmt::Debug for PinnedDispatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PinnedDispatcher")
            .field("name", &self.inner.core.tag().name)
            .field("priority", &self.inner.core.priority())
            .field("running", &self.is_running())
            .finish()
    }
}

impl PinnedDispatcher {
    /// Start the dispatcher and its thread.
    pub fn new(
        name: &str,
        priority: Priority,
        context: DispatchContext,
    ) -> DispatchResult<Self> {
        let thread_name = format!("{}-pinned-{}", context.thread_name_prefix, name);
        let core = DispatcherCore::new(name, priority, context);
        let (sender, receiver) = channel::unbounded::<Arc<TaskUnit>>();
        let discard = Arc::new(AtomicBool::new(false));

        let flag = discard.clone();
        let dispatcher = core.tag().name.clone();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                debug!(%dispatcher, "pinned thread started");
                for unit in receiver {
                    if flag.load(Ordering::SeqCst) {
                        unit.discard();
                    } else {
                        unit.run();
                    }
                }
                debug!(%dispatcher, "pinned thread exiting");
            })
            .map_err(|e| DispatchError::ThreadSpawn(e.to_string()))?;

        let thread_id = handle.thread().id();
        Ok(Self {
            inner: Arc::new(PinnedInner {
                core,
                sender: Mutex::new(Some(sender)),
                discard,
                thread: Mutex::new(Some(handle)),
                thread_id,
            }),
        })
    }

    /// Whether the dispatcher still accepts work.
    pub fn is_running(&self) -> bool {
        self.inner.sender.lock().is_some()
    }

    /// Stop the private thread.
    ///
    /// `force = false` runs every queued unit first and joins the thread;
    /// `force = true` discards queued units and returns at once.
    pub fn shutdown(
        &self,
        force: bool,
    ) {
        self.inner.shutdown(force);
    }
}

impl Dispatcher for PinnedDispatcher {
    fn core(&self) -> &DispatcherCore {
        &self.inner.core
    }

    fn submit(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        let sender = self.inner.sender.lock();
        let Some(sender) = sender.as_ref() else {
            unit.discard();
            return Err(DispatchError::terminated(unit.sequence()));
        };
        sender
            .send(unit)
            .map_err(|e| {
                let unit = e.into_inner();
                unit.discard();
                DispatchError::terminated(unit.sequence())
            })?;
        Ok(DispatchStatus::Executed)
    }

    /// Units already run one at a time in submission order.
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
        if thread::current().id() == self.inner.thread_id {
            return Err(DispatchError::RecursiveSync(self.name().to_string()));
        }
        Ok(())
    }

    fn to_shared(&self) -> Arc<dyn Dispatcher> {
        Arc::new(self.clone())
    }
}
