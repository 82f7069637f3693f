//! Core types shared by the coordinator, the executor and tasks

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for log output
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// States only move forward. A cancelled task goes from `Pending` straight to
/// `Finishing` without ever entering `Executing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built, not yet submitted
    Initialized,
    /// Submitted and waiting for dependencies
    Pending,
    /// Body is running
    Executing,
    /// `will_finish` observers are running
    Finishing,
    /// Done, `did_finish` observers have been called
    Finished,
}

impl TaskState {
    /// Whether the task has been submitted to a queue
    pub fn is_enqueued(&self) -> bool {
        *self >= TaskState::Pending
    }

    pub fn is_finished(&self) -> bool {
        *self == TaskState::Finished
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Initialized
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Initialized => write!(f, "initialized"),
            TaskState::Pending => write!(f, "pending"),
            TaskState::Executing => write!(f, "executing"),
            TaskState::Finishing => write!(f, "finishing"),
            TaskState::Finished => write!(f, "finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_short() {
        let id = TaskId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.0.simple().to_string().starts_with(&id.short()));
        assert_ne!(id, TaskId::new());
    }

    #[test]
    fn test_state_ordering() {
        assert!(TaskState::Initialized < TaskState::Pending);
        assert!(TaskState::Pending < TaskState::Executing);
        assert!(TaskState::Executing < TaskState::Finishing);
        assert!(TaskState::Finishing < TaskState::Finished);
        assert!(!TaskState::Initialized.is_enqueued());
        assert!(TaskState::Finishing.is_enqueued());
        assert!(TaskState::Finished.is_finished());
    }
}
