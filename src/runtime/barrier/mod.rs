//! Ordering barrier for concurrent dispatchers.
//!
//! While idle the barrier only counts the units it lets through. A barrier
//! unit flips it to draining: later units are parked in `queued_after`, the
//! barrier unit itself waits until every earlier unit has finished, then runs
//! alone. When it finishes the parked units are released in submission order,
//! up to the next parked barrier, which starts the cycle again.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::runtime::error::DispatchResult;
use crate::runtime::pool::WorkerPool;
use crate::runtime::task::{DispatchStatus, TaskUnit};

/// Hook consulted before a dispatcher hands a unit to the pool.
pub trait Interceptor: Send + Sync {
    /// Either keep `unit` (returning [`DispatchStatus::Intercepted`]) or let
    /// the caller submit it (returning [`DispatchStatus::Executed`]).
    fn intercept(
        &self,
        unit: &Arc<TaskUnit>,
    ) -> DispatchStatus;
}

/// Barrier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPhase {
    /// Units flow straight to the pool.
    Idle,
    /// Waiting for units submitted before the barrier to finish.
    Draining,
    /// The barrier unit is executing.
    RunningBarrier,
}

enum Parked {
    Unit(Arc<TaskUnit>),
    Barrier(Arc<TaskUnit>),
}

struct BarrierState {
    phase: BarrierPhase,
    /// Admitted units that have not finished.
    in_flight: usize,
    /// Barrier unit waiting for `in_flight` to reach zero.
    waiting: Option<Arc<TaskUnit>>,
    queued_after: VecDeque<Parked>,
}

/// Per-dispatcher barrier.
pub struct OrderingBarrier {
    name: Arc<str>,
    pool: Arc<WorkerPool>,
    state: Mutex<BarrierState>,
}

impl fmt::Debug for OrderingBarrier {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OrderingBarrier")
            .field("name", &self.name)
            .field("phase", &state.phase)
            .field("in_flight", &state.in_flight)
            .field("queued_after", &state.queued_after.len())
            .finish()
    }
}

impl OrderingBarrier {
    /// Create an idle barrier that releases work onto `pool`.
    pub fn new(
        name: Arc<str>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            pool,
            state: Mutex::new(BarrierState {
                phase: BarrierPhase::Idle,
                in_flight: 0,
                waiting: None,
                queued_after: VecDeque::new(),
            }),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> BarrierPhase {
        self.state.lock().phase
    }

    /// Units held back behind an active barrier.
    pub fn queued_after(&self) -> usize {
        self.state.lock().queued_after.len()
    }

    /// Admitted units still queued or running.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Submit a barrier unit.
    ///
    /// Returns [`DispatchStatus::Executed`] if it went straight to the pool
    /// because nothing was in flight, [`DispatchStatus::Intercepted`] if it is
    /// waiting for earlier work. Fails only if the pool rejects a barrier that
    /// was started immediately.
    pub fn add_barrier(
        self: &Arc<Self>,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<DispatchStatus> {
        let this = self.clone();
        unit.add_listener(move |_| this.on_barrier_done());

        let start_now = {
            let mut state = self.state.lock();
            match state.phase {
                BarrierPhase::Idle if state.in_flight == 0 => {
                    state.phase = BarrierPhase::RunningBarrier;
                    true
                },
                BarrierPhase::Idle => {
                    state.phase = BarrierPhase::Draining;
                    state.waiting = Some(unit.clone());
                    false
                },
                BarrierPhase::Draining | BarrierPhase::RunningBarrier => {
                    state.queued_after.push_back(Parked::Barrier(unit.clone()));
                    false
                },
            }
        };

        debug!(
            dispatcher = %self.name,
            sequence = unit.sequence(),
            start_now,
            "barrier submitted"
        );
        if start_now {
            self.launch_barrier(unit)?;
            Ok(DispatchStatus::Executed)
        } else {
            Ok(DispatchStatus::Intercepted)
        }
    }

    /// Admit a unit that one of this dispatcher's own units blocks on.
    ///
    /// Only succeeds while idle: parked behind a pending barrier, the unit
    /// and the barrier would wait for each other. A refused unit is left
    /// untouched.
    pub(crate) fn admit_nested(
        self: &Arc<Self>,
        unit: &Arc<TaskUnit>,
    ) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase != BarrierPhase::Idle {
                return false;
            }
            state.in_flight += 1;
        }
        let barrier = self.clone();
        unit.add_listener(move |_| barrier.on_unit_done());
        true
    }

    /// Undo the admission of a unit the pool refused after [`Interceptor::intercept`]
    /// let it through.
    pub(crate) fn cancel_admission(&self) {
        self.on_unit_done();
    }

    fn launch_barrier(
        &self,
        unit: Arc<TaskUnit>,
    ) -> DispatchResult<()> {
        self.pool.execute(unit).inspect_err(|e| {
            // The unit is gone, so its listener will never reopen the gate.
            warn!(dispatcher = %self.name, error = %e, "barrier task rejected");
            self.on_barrier_done();
        })
    }

    fn launch_unit(
        &self,
        unit: Arc<TaskUnit>,
    ) {
        if let Err(e) = self.pool.execute(unit) {
            warn!(dispatcher = %self.name, error = %e, "released task rejected");
            self.on_unit_done();
        }
    }

    fn on_unit_done(&self) {
        let barrier = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.phase == BarrierPhase::Draining && state.in_flight == 0 {
                state.phase = BarrierPhase::RunningBarrier;
                state.waiting.take()
            } else {
                None
            }
        };
        if let Some(barrier) = barrier {
            debug!(dispatcher = %self.name, sequence = barrier.sequence(), "barrier drained");
            let _ = self.launch_barrier(barrier);
        }
    }

    fn on_barrier_done(&self) {
        let mut released = Vec::new();
        let mut next_barrier = None;
        {
            let mut state = self.state.lock();
            state.phase = BarrierPhase::Idle;
            while let Some(parked) = state.queued_after.pop_front() {
                match parked {
                    Parked::Unit(unit) => {
                        state.in_flight += 1;
                        released.push(unit);
                    },
                    Parked::Barrier(unit) if state.in_flight == 0 => {
                        state.phase = BarrierPhase::RunningBarrier;
                        next_barrier = Some(unit);
                        break;
                    },
                    Parked::Barrier(unit) => {
                        state.phase = BarrierPhase::Draining;
                        state.waiting = Some(unit);
                        break;
                    },
                }
            }
        }

        debug!(
            dispatcher = %self.name,
            released = released.len(),
            "barrier finished"
        );
        for unit in released {
            self.launch_unit(unit);
        }
        if let Some(barrier) = next_barrier {
            let _ = self.launch_barrier(barrier);
        }
    }
}

impl Interceptor for Arc<OrderingBarrier> {
    fn intercept(
        &self,
        unit: &Arc<TaskUnit>,
    ) -> DispatchStatus {
        let barrier = self.clone();
        unit.add_listener(move |_| barrier.on_unit_done());

        let mut state = self.state.lock();
        if state.phase == BarrierPhase::Idle {
            state.in_flight += 1;
            DispatchStatus::Executed
        } else {
            state.queued_after.push_back(Parked::Unit(unit.clone()));
            DispatchStatus::Intercepted
        }
    }
}

#[cfg(test)]
mod tests;
