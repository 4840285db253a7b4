//! Runtime system
//!
//! Worker pool, task units and the dispatchers built on top of them.

pub mod barrier;
pub mod dispatcher;
pub mod error;
pub mod group;
pub mod pool;
pub mod registry;
pub mod task;

pub use dispatcher::{
    ConcurrentDispatcher, Dispatcher, GlobalDispatcher, PinnedDispatcher, SerialDispatcher,
};
pub use error::{DispatchError, DispatchResult, ErrorKind};
pub use group::CompletionGroup;
pub use pool::WorkerPool;
pub use registry::DispatchRegistry;
pub use task::{DispatchStatus, Priority, RevocableHandle, TaskOutcome};
