//! Lifecycle observers and the queue delegate
//!
//! Observers are attached per task and called synchronously on the thread that
//! drives the lifecycle transition. For a single task the order is always
//! `did_start`, any number of `did_produce`, `will_finish`, `did_finish`.

use crate::coord::coordinator::Coordinator;
use crate::coord::task::TaskRef;
use crate::core::errors::TaskError;

/// Observer of a single task's lifecycle. Every method defaults to a no-op.
pub trait TaskObserver: Send + Sync {
    /// The task body is about to run. Not called for cancelled tasks.
    fn did_start(&self, _task: &TaskRef) {}

    /// The running task produced another task
    fn did_produce(&self, _task: &TaskRef, _produced: &TaskRef) {}

    /// The task is about to finish with `errors`
    fn will_finish(&self, _task: &TaskRef, _errors: &[TaskError]) {}

    /// The task has finished with `errors`
    fn did_finish(&self, _task: &TaskRef, _errors: &[TaskError]) {}
}

/// Observer built from a `did_start` closure
pub struct StartObserver<F> {
    f: F,
}

impl<F> StartObserver<F>
where
    F: Fn(&TaskRef) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TaskObserver for StartObserver<F>
where
    F: Fn(&TaskRef) + Send + Sync,
{
    fn did_start(&self, task: &TaskRef) {
        (self.f)(task)
    }
}

/// Observer built from a `did_produce` closure
pub struct ProducedTaskObserver<F> {
    f: F,
}

impl<F> ProducedTaskObserver<F>
where
    F: Fn(&TaskRef, &TaskRef) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TaskObserver for ProducedTaskObserver<F>
where
    F: Fn(&TaskRef, &TaskRef) + Send + Sync,
{
    fn did_produce(&self, task: &TaskRef, produced: &TaskRef) {
        (self.f)(task, produced)
    }
}

/// Observer built from a `will_finish` closure
pub struct WillFinishObserver<F> {
    f: F,
}

impl<F> WillFinishObserver<F>
where
    F: Fn(&TaskRef, &[TaskError]) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TaskObserver for WillFinishObserver<F>
where
    F: Fn(&TaskRef, &[TaskError]) + Send + Sync,
{
    fn will_finish(&self, task: &TaskRef, errors: &[TaskError]) {
        (self.f)(task, errors)
    }
}

/// Observer built from a `did_finish` closure
pub struct DidFinishObserver<F> {
    f: F,
}

impl<F> DidFinishObserver<F>
where
    F: Fn(&TaskRef, &[TaskError]) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TaskObserver for DidFinishObserver<F>
where
    F: Fn(&TaskRef, &[TaskError]) + Send + Sync,
{
    fn did_finish(&self, task: &TaskRef, errors: &[TaskError]) {
        (self.f)(task, errors)
    }
}

/// Logs every lifecycle event
pub struct LoggingObserver {
    queue: String,
}

impl LoggingObserver {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }
}

impl TaskObserver for LoggingObserver {
    fn did_start(&self, task: &TaskRef) {
        tracing::info!(queue = %self.queue, task = %task.id().short(), name = %task.name(), "task started");
    }

    fn did_produce(&self, task: &TaskRef, produced: &TaskRef) {
        tracing::info!(
            queue = %self.queue,
            task = %task.id().short(),
            produced = %produced.name(),
            "task produced another task"
        );
    }

    fn will_finish(&self, task: &TaskRef, errors: &[TaskError]) {
        tracing::debug!(queue = %self.queue, task = %task.id().short(), errors = errors.len(), "task finishing");
    }

    fn did_finish(&self, task: &TaskRef, errors: &[TaskError]) {
        if errors.is_empty() {
            tracing::info!(queue = %self.queue, task = %task.id().short(), name = %task.name(), "task finished");
        } else {
            for error in errors {
                tracing::warn!(
                    queue = %self.queue,
                    task = %task.id().short(),
                    name = %task.name(),
                    category = error.category(),
                    "task finished with error: {}",
                    error
                );
            }
        }
    }
}

/// Queue-level delegate.
///
/// Informational only: it cannot veto or alter admission. The coordinator
/// holds it weakly.
pub trait QueueDelegate: Send + Sync {
    /// A task is about to be handed to the executor
    fn will_add(&self, _queue: &Coordinator, _task: &TaskRef) {}

    /// A task submitted to `queue` is about to finish
    fn will_finish(&self, _queue: &Coordinator, _task: &TaskRef, _errors: &[TaskError]) {}

    /// A task submitted to `queue` has finished
    fn did_finish(&self, _queue: &Coordinator, _task: &TaskRef, _errors: &[TaskError]) {}
}
