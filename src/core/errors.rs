use thiserror::Error;

/// Errors attached to a task when it finishes.
///
/// These never cross a `submit` call. They are accumulated on the task and
/// delivered to `will_finish` / `did_finish` observers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// A condition evaluated to failure, so the task was cancelled before it started
    #[error("Condition '{condition}' failed: {reason}")]
    ConditionFailed { condition: String, reason: String },

    /// A dependency was cancelled or finished with errors
    #[error("Dependency '{dependency}' did not finish cleanly")]
    DependencyFailed { dependency: String },

    /// The task was cancelled
    #[error("Task was cancelled{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Cancelled { reason: Option<String> },

    /// The work body (or the executor running it) failed
    #[error("Execution failed: {message}")]
    Execution { message: String },
}

impl TaskError {
    /// Create a condition failure
    pub fn condition_failed<C: Into<String>, R: Into<String>>(condition: C, reason: R) -> Self {
        Self::ConditionFailed {
            condition: condition.into(),
            reason: reason.into(),
        }
    }

    /// Create a dependency failure
    pub fn dependency_failed<S: Into<String>>(dependency: S) -> Self {
        Self::DependencyFailed {
            dependency: dependency.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(reason: S) -> Self {
        Self::Cancelled {
            reason: Some(reason.into()),
        }
    }

    /// Create an execution error
    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConditionFailed { .. } => "condition",
            Self::DependencyFailed { .. } => "dependency",
            Self::Cancelled { .. } => "cancelled",
            Self::Execution { .. } => "execution",
        }
    }
}

/// Work bodies return `anyhow` errors; keep the whole context chain.
impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::execution(format!("{:#}", err))
    }
}

/// Errors returned by the queue's own API
#[derive(Debug, Error)]
pub enum QueueError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A task tried to produce another task after it started finishing
    #[error("Task '{task}' cannot produce tasks after it started finishing")]
    ProducedAfterFinish { task: String },

    /// YAML configuration could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl QueueError {
    /// Create a configuration error for a specific field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, QueueError>;
