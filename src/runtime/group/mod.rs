//! Completion groups.
//!
//! A [`CompletionGroup`] counts associated units that have not finished yet
//! and holds callbacks to run once the count returns to zero. The count and
//! the callback queue sit behind one lock, so a callback added while the last
//! unit completes is delivered exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::task::Runnable;

/// Default bound on queued notifications.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1000;

struct GroupState {
    outstanding: usize,
    notifications: VecDeque<Runnable>,
}

/// Join primitive over a set of units.
pub struct CompletionGroup {
    state: Mutex<GroupState>,
    all_done: Condvar,
    capacity: usize,
}

impl fmt::Debug for CompletionGroup {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CompletionGroup")
            .field("outstanding", &state.outstanding)
            .field("notifications", &state.notifications.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for CompletionGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionGroup {
    /// Create a group with the default notification capacity.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Create a group holding at most `capacity` pending notifications.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(GroupState {
                outstanding: 0,
                notifications: VecDeque::new(),
            }),
            all_done: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Units associated but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Notifications waiting for the count to reach zero.
    pub fn pending_notifications(&self) -> usize {
        self.state.lock().notifications.len()
    }

    /// Count one more unit. Must happen before that unit is submitted.
    pub fn associate(&self) {
        self.state.lock().outstanding += 1;
    }

    /// Mark one associated unit finished.
    ///
    /// The call that brings the count to zero wakes every waiter and runs the
    /// queued notifications in FIFO order on the current thread.
    pub fn notify_done(&self) {
        let drained = {
            let mut state = self.state.lock();
            if state.outstanding == 0 {
                warn!("notify_done on a group with no outstanding tasks");
                return;
            }
            state.outstanding -= 1;
            if state.outstanding > 0 {
                return;
            }
            self.all_done.notify_all();
            std::mem::take(&mut state.notifications)
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "group drained, running notifications");
        }
        for notification in drained {
            run_notification(notification);
        }
    }

    /// Run `callback` once the group is empty.
    ///
    /// If nothing is outstanding the callback runs immediately on the calling
    /// thread. Otherwise it is queued, unless the queue is full.
    pub fn add_notification(
        &self,
        callback: Runnable,
    ) -> DispatchResult<()> {
        {
            let mut state = self.state.lock();
            if state.outstanding > 0 {
                if state.notifications.len() >= self.capacity {
                    warn!(capacity = self.capacity, "group notification queue full");
                    return Err(DispatchError::NotificationOverflow(self.capacity));
                }
                state.notifications.push_back(callback);
                return Ok(());
            }
        }
        run_notification(callback);
        Ok(())
    }

    /// Wait for the count to reach zero.
    ///
    /// Returns `true` at once if nothing is outstanding. A non-positive
    /// timeout never waits.
    pub fn wait(
        &self,
        timeout_ms: i64,
    ) -> bool {
        let mut state = self.state.lock();
        if state.outstanding == 0 {
            return true;
        }
        if timeout_ms <= 0 {
            return false;
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        while state.outstanding > 0 {
            if self.all_done.wait_until(&mut state, deadline).timed_out() {
                return state.outstanding == 0;
            }
        }
        true
    }
}

/// A panicking notification is logged; the remaining ones still run.
fn run_notification(notification: Runnable) {
    if panic::catch_unwind(AssertUnwindSafe(notification)).is_err() {
        error!("group notification panicked");
    }
}
