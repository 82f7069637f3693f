//! Executor capability and the tokio-backed reference executor

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::coord::task::TaskRef;
use crate::core::config::QueueConfig;
use crate::core::errors::TaskError;

/// The engine a coordinator hands admitted tasks to.
///
/// An executor must not run a task before all of its dependencies have
/// finished, and must drive it through `Task::execute` (or finish it with
/// `Task::finish_with_errors` if it cannot run it).
pub trait Executor: Send + Sync {
    /// Take ownership of scheduling `task`
    fn admit(&self, task: TaskRef);

    /// Record that `task` must not start before `dependency` finishes
    fn add_dependency(&self, task: &TaskRef, dependency: &TaskRef) {
        task.add_dependency(dependency.clone());
    }
}

/// Spawns one tokio task per admitted task
pub struct TokioExecutor {
    permits: Option<Arc<Semaphore>>,
}

impl TokioExecutor {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            permits: config
                .max_concurrent_tasks
                .map(|limit| Arc::new(Semaphore::new(limit))),
        }
    }

    /// Executor without a concurrency limit
    pub fn unbounded() -> Self {
        Self { permits: None }
    }
}

impl Default for TokioExecutor {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Executor for TokioExecutor {
    fn admit(&self, task: TaskRef) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(task = %task.id().short(), name = %task.name(), "cannot admit task: {}", e);
                task.finish_with_errors(vec![TaskError::execution("no tokio runtime available")]);
                return;
            }
        };
        handle.spawn(run_task(task, self.permits.clone()));
    }
}

async fn run_task(task: TaskRef, permits: Option<Arc<Semaphore>>) {
    wait_for_dependencies(&task).await;

    // Cancelled tasks finish without taking a slot
    let _permit = match permits {
        Some(semaphore) if !task.is_cancelled() => match semaphore.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                task.finish_with_errors(vec![TaskError::execution("executor closed")]);
                return;
            }
        },
        _ => None,
    };

    debug!(task = %task.id().short(), name = %task.name(), "dependencies satisfied, executing");
    task.execute().await;
}

/// Wait until every dependency has finished. Edges added while waiting are
/// picked up on the next pass.
async fn wait_for_dependencies(task: &TaskRef) {
    loop {
        let pending: Vec<TaskRef> = task
            .dependencies()
            .into_iter()
            .filter(|dependency| !dependency.is_finished())
            .collect();
        if pending.is_empty() {
            return;
        }
        for dependency in pending {
            dependency.wait_until_finished().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::task::Task;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_waits_for_dependencies() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let executor = TokioExecutor::unbounded();

        let log = order.clone();
        let first = Task::builder("first")
            .work_fn(move |_| {
                let log = log.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    log.lock().push("first");
                    Ok(())
                }
            })
            .build();
        let log = order.clone();
        let second = Task::builder("second")
            .dependency(first.clone())
            .work_fn(move |_| {
                let log = log.clone();
                async move {
                    log.lock().push("second");
                    Ok(())
                }
            })
            .build();

        executor.admit(second.clone());
        executor.admit(first);
        second.wait_until_finished().await;

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_respects_concurrency_limit() {
        let config = QueueConfig::serial();
        let executor = TokioExecutor::new(&config);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<TaskRef> = (0..4)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                Task::builder(format!("task-{}", i))
                    .work_fn(move |_| {
                        let running = running.clone();
                        let peak = peak.clone();
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })
                    .build()
            })
            .collect();

        for task in &tasks {
            executor.admit(task.clone());
        }
        for task in &tasks {
            task.wait_until_finished().await;
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_admit_outside_runtime_finishes_with_error() {
        let task = Task::builder("orphan").build();
        TokioExecutor::unbounded().admit(task.clone());

        assert!(task.is_finished());
        assert_eq!(task.errors(), vec![TaskError::execution("no tokio runtime available")]);
    }
}
