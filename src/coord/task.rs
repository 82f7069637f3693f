//! Tasks, their work bodies and their lifecycle
//!
//! A `Task` is always shared as a `TaskRef` (`Arc<Task>`). The executor that
//! admits it drives the lifecycle through `execute` (or `finish_with_errors`
//! for tasks it cannot run), and everything else only reads state.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::coord::condition::Condition;
use crate::coord::coordinator::{Coordinator, Inner};
use crate::coord::group::TaskGroup;
use crate::coord::hooks::TaskObserver;
use crate::coord::types::{TaskId, TaskState};
use crate::core::errors::{QueueError, Result, TaskError};

pub type TaskRef = Arc<Task>;

/// The body of a task
#[async_trait]
pub trait Work: Send + Sync {
    /// Run the task. An error is recorded on the task and reported to its
    /// finish observers.
    async fn run(&self, ctx: &TaskCtx) -> anyhow::Result<()>;

    /// Called once, right before the task is handed to the executor
    fn will_enqueue(&self, _task: &TaskRef) {}

    /// Group capability. Tasks produced by a task whose work returns `Some`
    /// here are appended to the group instead of being submitted.
    fn as_group(&self) -> Option<&dyn TaskGroup> {
        None
    }
}

/// Work that does nothing
pub struct NoopWork;

#[async_trait]
impl Work for NoopWork {
    async fn run(&self, _ctx: &TaskCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Work built from an async closure
pub struct FnWork<F> {
    f: F,
}

impl<F, Fut> FnWork<F>
where
    F: Fn(TaskCtx) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Work for FnWork<F>
where
    F: Fn(TaskCtx) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: &TaskCtx) -> anyhow::Result<()> {
        (self.f)(ctx.clone()).await
    }
}

/// Context handed to a running task (immutable, clonable)
#[derive(Clone)]
pub struct TaskCtx {
    task: TaskRef,
}

impl TaskCtx {
    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    /// Whether cancellation was requested. Long-running bodies should check
    /// this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Produce a new task from inside the running body
    pub fn produce(&self, produced: TaskRef) -> Result<()> {
        self.task.produce(produced)
    }

    /// Record an error without failing the body
    pub fn report_error(&self, error: TaskError) {
        self.task.errors.lock().push(error);
    }

    /// The coordinator the task was submitted to, if it is still alive
    pub fn queue(&self) -> Option<Coordinator> {
        self.task.queue()
    }
}

/// A unit of work with dependencies, conditions and a lifecycle
pub struct Task {
    id: TaskId,
    name: String,
    work: Box<dyn Work>,
    conditions: Vec<Arc<dyn Condition>>,
    dependencies: Mutex<Vec<TaskRef>>,
    observers: Mutex<Vec<Arc<dyn TaskObserver>>>,
    errors: Mutex<Vec<TaskError>>,
    cancelled: AtomicBool,
    // true until the task starts finishing; produce() holds a read guard
    accepting_produced: RwLock<bool>,
    state: watch::Sender<TaskState>,
    done: watch::Sender<bool>,
    queue: Mutex<Option<Weak<Inner>>>,
    submitted_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl Task {
    /// Start building a task
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    /// Build a task with only a body
    pub fn new(name: impl Into<String>, work: impl Work + 'static) -> TaskRef {
        Self::builder(name).work(work).build()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Add a direct dependency. Self edges and duplicates are ignored.
    pub fn add_dependency(&self, dependency: TaskRef) {
        if dependency.id == self.id {
            tracing::warn!(task = %self.id.short(), "ignoring dependency of a task on itself");
            return;
        }
        let mut dependencies = self.dependencies.lock();
        if !dependencies.iter().any(|d| d.id == dependency.id) {
            dependencies.push(dependency);
        }
    }

    /// Current dependencies. Released once the task finishes.
    pub fn dependencies(&self) -> Vec<TaskRef> {
        self.dependencies.lock().clone()
    }

    pub fn conditions(&self) -> &[Arc<dyn Condition>] {
        &self.conditions
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Auxiliary tasks the conditions need before they can be evaluated.
    /// Every call asks the conditions again, so call it once per submission.
    pub fn indirect_dependencies(self: &Arc<Self>) -> Vec<TaskRef> {
        self.conditions
            .iter()
            .flat_map(|condition| condition.indirect_dependencies(self))
            .collect()
    }

    pub fn add_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.observers.lock().push(observer);
    }

    /// Cancel the task. Returns false if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.cancel_with_errors(Vec::new())
    }

    /// Cancel the task and attach `errors`. Only the first cancellation
    /// records anything. A task that is already running only sees the flag
    /// through `TaskCtx::is_cancelled`.
    pub fn cancel_with_errors(&self, errors: Vec<TaskError>) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::debug!(task = %self.id.short(), name = %self.name, errors = errors.len(), "task cancelled");
        self.errors.lock().extend(errors);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Errors recorded so far
    pub fn errors(&self) -> Vec<TaskError> {
        self.errors.lock().clone()
    }

    /// Whether any error has been recorded
    pub fn failed(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    /// True once every `did_finish` observer has run
    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Resolve once the task is finished and its `did_finish` observers ran
    pub async fn wait_until_finished(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn as_group(&self) -> Option<&dyn TaskGroup> {
        self.work.as_group()
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        *self.submitted_at.lock()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }

    /// The coordinator this task was submitted to, if it is still alive
    pub fn queue(&self) -> Option<Coordinator> {
        self.queue
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Coordinator::from_inner)
    }

    /// Produce another task. Observers route it (see `Coordinator::submit`).
    pub fn produce(self: &Arc<Self>, produced: TaskRef) -> Result<()> {
        let accepting = self.accepting_produced.read_recursive();
        if !*accepting {
            return Err(QueueError::ProducedAfterFinish {
                task: self.name.clone(),
            });
        }
        for observer in self.observers() {
            observer.did_produce(self, &produced);
        }
        Ok(())
    }

    /// Run the body if the task was not cancelled, then finish it.
    /// Executors call this once every dependency has finished.
    pub async fn execute(self: &Arc<Self>) {
        if !self.start() {
            self.finish_with_errors(Vec::new());
            return;
        }

        let ctx = TaskCtx { task: self.clone() };
        let outcome = AssertUnwindSafe(self.work.run(&ctx)).catch_unwind().await;
        let errors = match outcome {
            Ok(Ok(())) => Vec::new(),
            Ok(Err(e)) => vec![TaskError::from(e)],
            Err(_) => {
                tracing::error!(task = %self.id.short(), name = %self.name, "task body panicked");
                vec![TaskError::execution("task body panicked")]
            }
        };
        self.finish_with_errors(errors);
    }

    /// Finish the task with `errors` appended to whatever was already
    /// recorded. Fires `will_finish`, then `did_finish`. Later calls are no-ops.
    pub fn finish_with_errors(self: &Arc<Self>, errors: Vec<TaskError>) {
        {
            let mut accepting = self.accepting_produced.write();
            if self.state() >= TaskState::Finishing {
                return;
            }
            *accepting = false;
            self.state.send_replace(TaskState::Finishing);
        }

        let errors = {
            let mut recorded = self.errors.lock();
            recorded.extend(errors);
            recorded.clone()
        };
        let observers = self.observers();

        for observer in &observers {
            observer.will_finish(self, &errors);
        }

        self.dependencies.lock().clear();
        *self.finished_at.lock() = Some(Utc::now());
        self.state.send_replace(TaskState::Finished);

        for observer in &observers {
            observer.did_finish(self, &errors);
        }
        self.observers.lock().clear();
        self.done.send_replace(true);
    }

    /// Move to `Executing`. False if cancelled or already past pending.
    fn start(self: &Arc<Self>) -> bool {
        if self.is_cancelled() || self.state() >= TaskState::Executing {
            return false;
        }
        self.state.send_replace(TaskState::Executing);
        for observer in self.observers() {
            observer.did_start(self);
        }
        true
    }

    /// Record the submission. False if the task was submitted before.
    pub(crate) fn mark_submitted(&self, queue: Weak<Inner>) -> bool {
        let mut submitted_at = self.submitted_at.lock();
        if submitted_at.is_some() {
            return false;
        }
        *submitted_at = Some(Utc::now());
        *self.queue.lock() = Some(queue);
        true
    }

    /// Move to `Pending` and let the body know it is about to be enqueued
    pub(crate) fn will_enqueue(self: &Arc<Self>) {
        if self.state() == TaskState::Initialized {
            self.state.send_replace(TaskState::Pending);
        }
        self.work.will_enqueue(self);
    }

    fn observers(&self) -> Vec<Arc<dyn TaskObserver>> {
        self.observers.lock().clone()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Builder for `Task`
pub struct TaskBuilder {
    name: String,
    work: Option<Box<dyn Work>>,
    conditions: Vec<Arc<dyn Condition>>,
    dependencies: Vec<TaskRef>,
    observers: Vec<Arc<dyn TaskObserver>>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            work: None,
            conditions: Vec::new(),
            dependencies: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Set the task body
    pub fn work(mut self, work: impl Work + 'static) -> Self {
        self.work = Some(Box::new(work));
        self
    }

    /// Set the task body from an async closure
    pub fn work_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(TaskCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.work(FnWork::new(f))
    }

    /// Attach a condition. Conditions are fixed once the task is built.
    pub fn condition(mut self, condition: impl Condition + 'static) -> Self {
        self.conditions.push(Arc::new(condition));
        self
    }

    pub fn shared_condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn dependency(mut self, dependency: TaskRef) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn observer(mut self, observer: impl TaskObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn build(self) -> TaskRef {
        let task = Arc::new(Task {
            id: TaskId::new(),
            name: self.name,
            work: self.work.unwrap_or_else(|| Box::new(NoopWork)),
            conditions: self.conditions,
            dependencies: Mutex::new(Vec::new()),
            observers: Mutex::new(self.observers),
            errors: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            accepting_produced: RwLock::new(true),
            state: watch::channel(TaskState::Initialized).0,
            done: watch::channel(false).0,
            queue: Mutex::new(None),
            submitted_at: Mutex::new(None),
            finished_at: Mutex::new(None),
        });
        for dependency in self.dependencies {
            task.add_dependency(dependency);
        }
        task
    }
}
