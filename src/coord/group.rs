//! Group tasks
//!
//! A group is any task whose work exposes the `TaskGroup` capability. Tasks it
//! produces are appended to the group instead of being submitted to the queue
//! the group runs on.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::coord::coordinator::Coordinator;
use crate::coord::exclusivity::ExclusivityManager;
use crate::coord::task::{Task, TaskCtx, TaskRef, Work};
use crate::core::config::QueueConfig;

/// Capability of a task's work to own member tasks
pub trait TaskGroup: Send + Sync {
    /// Add a member. Members appended while the group runs are run too.
    fn append(&self, task: TaskRef);

    /// Members appended so far
    fn members(&self) -> Vec<TaskRef>;
}

/// Runs its members on a private queue and finishes once all of them have
/// finished, with their errors. Tasks produced by members become members.
///
/// The private queue shares the exclusivity registry of the queue the group
/// was submitted to. A member that is mutually exclusive with the group itself
/// therefore waits for the group, which waits for the member.
pub struct GroupTask {
    members: Mutex<Vec<TaskRef>>,
    // set while run() accepts appended members
    running: Mutex<Option<mpsc::UnboundedSender<TaskRef>>>,
    config: QueueConfig,
}

impl GroupTask {
    pub fn new(members: Vec<TaskRef>) -> Self {
        Self::with_config(
            members,
            QueueConfig {
                name: "group".to_string(),
                ..Default::default()
            },
        )
    }

    /// Group whose private queue uses `config`
    pub fn with_config(members: Vec<TaskRef>, config: QueueConfig) -> Self {
        Self {
            members: Mutex::new(members),
            running: Mutex::new(None),
            config,
        }
    }

    /// Wrap the group in a task
    pub fn into_task(self, name: impl Into<String>) -> TaskRef {
        Task::new(name, self)
    }

    /// Take the next appended member, or close the group if there is none.
    /// Holds the members lock so no append can slip in between.
    fn next_or_close(&self, rx: &mut mpsc::UnboundedReceiver<TaskRef>) -> Option<TaskRef> {
        let _members = self.members.lock();
        match rx.try_recv() {
            Ok(task) => Some(task),
            Err(_) => {
                *self.running.lock() = None;
                None
            }
        }
    }
}

impl TaskGroup for GroupTask {
    fn append(&self, task: TaskRef) {
        let mut members = self.members.lock();
        members.push(task.clone());
        if let Some(tx) = self.running.lock().as_ref() {
            let _ = tx.send(task);
        }
    }

    fn members(&self) -> Vec<TaskRef> {
        self.members.lock().clone()
    }
}

#[async_trait]
impl Work for GroupTask {
    async fn run(&self, ctx: &TaskCtx) -> anyhow::Result<()> {
        let exclusivity = ctx
            .queue()
            .map(|queue| queue.exclusivity())
            .unwrap_or_else(ExclusivityManager::shared);
        let queue = Coordinator::builder()
            .config(self.config.clone())
            .exclusivity(exclusivity)
            .owner(ctx.task())
            .build()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut submitted = {
            let members = self.members.lock();
            *self.running.lock() = Some(tx);
            members.clone()
        };
        tracing::debug!(
            group = %ctx.task().name(),
            members = submitted.len(),
            "running group members"
        );
        queue.submit_all(submitted.clone());

        loop {
            tokio::select! {
                Some(task) = rx.recv() => {
                    submitted.push(task.clone());
                    queue.submit(task);
                }
                _ = queue.wait_until_idle() => {
                    match self.next_or_close(&mut rx) {
                        Some(task) => {
                            submitted.push(task.clone());
                            queue.submit(task);
                        }
                        None => break,
                    }
                }
            }
        }

        for member in &submitted {
            for error in member.errors() {
                ctx.report_error(error);
            }
        }
        Ok(())
    }

    fn as_group(&self) -> Option<&dyn TaskGroup> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::TaskError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(name: &str, counter: Arc<AtomicUsize>) -> TaskRef {
        Task::builder(name)
            .work_fn(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build()
    }

    #[tokio::test]
    async fn test_group_runs_all_members() {
        let runs = Arc::new(AtomicUsize::new(0));
        let group = GroupTask::new(vec![counting("a", runs.clone()), counting("b", runs.clone())]);
        group.append(counting("c", runs.clone()));
        let task = group.into_task("group");

        task.execute().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(task.errors().is_empty());
        assert_eq!(task.as_group().map(|g| g.members().len()), Some(3));
    }

    #[tokio::test]
    async fn test_group_collects_member_errors() {
        let failing = Task::builder("failing")
            .work_fn(|_| async { Err(anyhow::anyhow!("member failed")) })
            .build();
        let task = GroupTask::new(vec![failing]).into_task("group");

        task.execute().await;

        assert_eq!(task.errors(), vec![TaskError::execution("member failed")]);
    }

    #[tokio::test]
    async fn test_empty_group_finishes() {
        let task = GroupTask::new(Vec::new()).into_task("empty");
        task.execute().await;
        assert!(task.is_finished());
    }
}
