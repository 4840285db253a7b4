//! taskdispatch
//!
//! Priority-aware task dispatching: submit closures to serial, concurrent,
//! global or thread-pinned queues backed by one shared worker pool, and
//! compose them with completion groups, ordering barriers and revocable
//! handles.
//!
//! # Example
//!
//! ```no_run
//! use taskdispatch::{DispatchRegistry, Dispatcher, Priority};
//!
//! let registry = DispatchRegistry::with_defaults().unwrap();
//! let serial = registry.create_serial_dispatcher("io", Priority::Default).unwrap();
//! let group = serial.create_group();
//! for i in 0..3 {
//!     serial
//!         .async_group_dispatch(&group, Box::new(move || println!("step {}", i)))
//!         .unwrap();
//! }
//! assert!(serial.group_wait(&group, 1000));
//! registry.shutdown(false);
//! ```

#![warn(rust_2018_idioms)]

// Public modules
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use runtime::{
    CompletionGroup, ConcurrentDispatcher, DispatchError, DispatchRegistry, DispatchResult,
    DispatchStatus, Dispatcher, ErrorKind, GlobalDispatcher, PinnedDispatcher, Priority,
    RevocableHandle, SerialDispatcher, TaskOutcome, WorkerPool,
};
pub use util::config::DispatchConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "taskdispatch";
