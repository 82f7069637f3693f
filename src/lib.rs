//! Condition-gated task queue
//!
//! Tasks carry declarative conditions. On submission the coordinator derives
//! the dependency edges those conditions imply, orders tasks that share a
//! mutually exclusive category, and reports every task's outcome through
//! lifecycle observers.
//!
//! ```no_run
//! use gatequeue::{Coordinator, MutuallyExclusive, Task};
//!
//! # async fn demo() {
//! let queue = Coordinator::new();
//! let task = Task::builder("sync")
//!     .condition(MutuallyExclusive::new("network"))
//!     .work_fn(|_ctx| async { Ok(()) })
//!     .build();
//! queue.submit(task.clone());
//! task.wait_until_finished().await;
//! # }
//! ```

pub mod coord;
pub mod core;

// Re-exports for convenience
pub use coord::*;
pub use crate::core::config::{QueueConfig, QueueConfigBuilder};
pub use crate::core::errors::{QueueError, Result, TaskError};
