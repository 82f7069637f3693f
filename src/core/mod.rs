// Infrastructure shared by the coordinator and its tasks

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{QueueConfig, QueueConfigBuilder};
pub use errors::{QueueError, Result, TaskError};
