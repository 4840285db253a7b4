//! Dispatch error types.

use std::fmt;

/// Why the worker pool refused a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The pool has been terminated.
    Terminated,
    /// The target lane reached its configured capacity.
    QueueFull,
}

impl fmt::Display for RejectReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            RejectReason::Terminated => write!(f, "pool terminated"),
            RejectReason::QueueFull => write!(f, "lane queue full"),
        }
    }
}

/// Coarse classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad argument or configuration; nothing was enqueued.
    Validation,
    /// The work could not be handed to the pool.
    EnqueueFailure,
}

/// Errors returned by dispatch operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Argument failed validation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Worker pool refused the unit
    #[error("Task {sequence} rejected: {reason}")]
    Rejected {
        /// Sequence number of the refused unit.
        sequence: u64,
        /// Why it was refused.
        reason: RejectReason,
    },

    /// Barrier requested on a dispatcher without barrier support
    #[error("Barriers are not available on dispatcher `{0}`")]
    BarrierUnsupported(String),

    /// Sync dispatch issued from a worker of the same single-flight dispatcher
    #[error("Sync dispatch onto `{0}` from its own worker would deadlock")]
    RecursiveSync(String),

    /// Some iterations of an apply dispatch could not be enqueued
    #[error("{failed} of {total} iterations failed to enqueue")]
    PartialApply {
        /// Iterations that were not enqueued.
        failed: usize,
        /// Iterations requested.
        total: usize,
    },

    /// Group notification queue is full
    #[error("Group notification queue is full (capacity {0})")]
    NotificationOverflow(usize),

    /// Invalid pool or registry configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused to start a worker thread
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),
}

impl DispatchError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidArgument(_)
            | DispatchError::BarrierUnsupported(_)
            | DispatchError::RecursiveSync(_)
            | DispatchError::InvalidConfig(_) => ErrorKind::Validation,
            DispatchError::Rejected { .. }
            | DispatchError::PartialApply { .. }
            | DispatchError::NotificationOverflow(_)
            | DispatchError::ThreadSpawn(_) => ErrorKind::EnqueueFailure,
        }
    }

    /// Shorthand for a rejection by a terminated pool.
    #[inline]
    pub fn terminated(sequence: u64) -> Self {
        DispatchError::Rejected {
            sequence,
            reason: RejectReason::Terminated,
        }
    }
}

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
