//! Coordinator - admission of tasks into an executor
//!
//! `submit` attaches the queue's observers, gates conditional tasks behind a
//! condition evaluator (and behind the previous holders of their exclusivity
//! categories), then hands the task to the executor. It never blocks and never
//! returns an error: everything that goes wrong is reported through the task's
//! finish observers.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::coord::evaluator::evaluator_for;
use crate::coord::exclusivity::ExclusivityManager;
use crate::coord::executor::{Executor, TokioExecutor};
use crate::coord::hooks::{
    DidFinishObserver, LoggingObserver, ProducedTaskObserver, QueueDelegate, WillFinishObserver,
};
use crate::coord::task::{Task, TaskRef};
use crate::coord::types::TaskId;
use crate::coord::wiring::WiringPlan;
use crate::core::config::QueueConfig;
use crate::core::errors::{Result, TaskError};

/// Task queue coordinator. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: QueueConfig,
    executor: Arc<dyn Executor>,
    exclusivity: Arc<ExclusivityManager>,
    delegate: RwLock<Option<Weak<dyn QueueDelegate>>>,
    // submitted and not yet finished
    in_flight: watch::Sender<usize>,
    tasks: DashMap<TaskId, Weak<Task>>,
    // group task whose members run on this queue
    owner: Option<Weak<Task>>,
}

impl Coordinator {
    /// Coordinator with the default configuration, a `TokioExecutor` and the
    /// shared exclusivity registry
    pub fn new() -> Self {
        let config = QueueConfig::default();
        let executor = Arc::new(TokioExecutor::new(&config));
        Self::from_parts(config, executor, ExclusivityManager::shared(), None, None)
    }

    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    fn from_parts(
        config: QueueConfig,
        executor: Arc<dyn Executor>,
        exclusivity: Arc<ExclusivityManager>,
        delegate: Option<Weak<dyn QueueDelegate>>,
        owner: Option<Weak<Task>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                exclusivity,
                delegate: RwLock::new(delegate),
                in_flight: watch::channel(0).0,
                tasks: DashMap::new(),
                owner,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// The exclusivity registry this queue registers categories in
    pub fn exclusivity(&self) -> Arc<ExclusivityManager> {
        self.inner.exclusivity.clone()
    }

    /// Install the delegate. Only a weak reference is kept.
    pub fn set_delegate<D: QueueDelegate + 'static>(&self, delegate: &Arc<D>) {
        let delegate = Arc::downgrade(delegate);
        let delegate: Weak<dyn QueueDelegate> = delegate;
        *self.inner.delegate.write() = Some(delegate);
    }

    pub fn clear_delegate(&self) {
        *self.inner.delegate.write() = None;
    }

    fn owner(&self) -> Option<TaskRef> {
        self.inner.owner.as_ref().and_then(Weak::upgrade)
    }

    fn delegate(&self) -> Option<Arc<dyn QueueDelegate>> {
        self.inner.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    /// Number of submitted tasks that have not finished yet, synthetic ones
    /// included
    pub fn task_count(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Live tasks that have been submitted and not finished yet
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.inner
            .tasks
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    /// Resolve once every submitted task has finished
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Submit every task in order
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = TaskRef>) {
        for task in tasks {
            self.submit(task);
        }
    }

    /// Submit a task. Tasks produced while it runs are submitted here too,
    /// unless it is a group.
    pub fn submit(&self, task: TaskRef) {
        if !task.mark_submitted(Arc::downgrade(&self.inner)) {
            warn!(
                queue = %self.inner.config.name,
                task = %task.id().short(),
                name = %task.name(),
                "task was already submitted, ignoring"
            );
            return;
        }

        self.inner.in_flight.send_modify(|count| *count += 1);
        self.inner.tasks.insert(task.id(), Arc::downgrade(&task));
        self.attach_observers(&task);

        if task.has_conditions() {
            self.gate_on_conditions(&task);
        }

        task.will_enqueue();
        if let Some(delegate) = self.delegate() {
            delegate.will_add(self, &task);
        }

        debug!(
            queue = %self.inner.config.name,
            task = %task.id().short(),
            name = %task.name(),
            dependencies = task.dependencies().len(),
            "admitting task"
        );
        self.inner.executor.admit(task);
    }

    fn attach_observers(&self, task: &TaskRef) {
        let queue = Arc::downgrade(&self.inner);
        task.add_observer(Arc::new(ProducedTaskObserver::new(
            move |task: &TaskRef, produced: &TaskRef| {
                if let Some(group) = task.as_group() {
                    group.append(produced.clone());
                    return;
                }
                let Some(coordinator) = queue.upgrade().map(Coordinator::from_inner) else {
                    warn!(
                        task = %task.id().short(),
                        produced = %produced.name(),
                        "queue is gone, dropping produced task"
                    );
                    return;
                };
                // members of a group hand produced tasks to the group
                match coordinator.owner() {
                    Some(owner) => match owner.as_group() {
                        Some(group) => group.append(produced.clone()),
                        None => coordinator.submit(produced.clone()),
                    },
                    None => coordinator.submit(produced.clone()),
                }
            },
        )));

        let queue = Arc::downgrade(&self.inner);
        task.add_observer(Arc::new(WillFinishObserver::new(
            move |task: &TaskRef, errors: &[TaskError]| {
                let Some(coordinator) = queue.upgrade().map(Coordinator::from_inner) else {
                    return;
                };
                if let Some(delegate) = coordinator.delegate() {
                    delegate.will_finish(&coordinator, task, errors);
                }
            },
        )));

        let queue = Arc::downgrade(&self.inner);
        task.add_observer(Arc::new(DidFinishObserver::new(
            move |task: &TaskRef, errors: &[TaskError]| {
                let Some(coordinator) = queue.upgrade().map(Coordinator::from_inner) else {
                    return;
                };
                if let Some(delegate) = coordinator.delegate() {
                    delegate.did_finish(&coordinator, task, errors);
                }
                coordinator.inner.tasks.remove(&task.id());
                coordinator
                    .inner
                    .in_flight
                    .send_modify(|count| *count = count.saturating_sub(1));
            },
        )));

        if self.inner.config.log_lifecycle {
            task.add_observer(Arc::new(LoggingObserver::new(self.inner.config.name.clone())));
        }
    }

    /// Put the task behind a condition evaluator, which itself runs after the
    /// previous holders of the task's exclusive categories, the task's direct
    /// dependencies and every indirect dependency of its conditions.
    fn gate_on_conditions(&self, task: &TaskRef) {
        let mut categories: Vec<&str> = Vec::new();
        for condition in task.conditions().iter().filter(|c| c.is_mutually_exclusive()) {
            let category = condition.category();
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        let previous = if categories.is_empty() {
            Vec::new()
        } else {
            self.inner.exclusivity.register_all(task, categories.as_slice())
        };

        let direct = task.dependencies();
        let indirect = task.indirect_dependencies();
        let evaluator = evaluator_for(task);

        let mut plan = WiringPlan::new(
            [task, &evaluator]
                .into_iter()
                .chain(&previous)
                .chain(&direct)
                .chain(&indirect),
        );
        // the evaluator is fresh, so this edge never closes a cycle and always
        // survives when later edges conflict
        plan.add_edge(task, &evaluator);
        for dependency in &indirect {
            for prerequisite in previous.iter().chain(&direct) {
                plan.add_edge(dependency, prerequisite);
            }
            plan.add_edge(&evaluator, dependency);
        }
        for prerequisite in previous.iter().chain(&direct) {
            plan.add_edge(&evaluator, prerequisite);
        }

        debug!(
            queue = %self.inner.config.name,
            task = %task.id().short(),
            categories = ?categories,
            previous = previous.len(),
            indirect = indirect.len(),
            edges = plan.edges().len(),
            "gating task on conditions"
        );
        plan.apply(self.inner.executor.as_ref());

        self.submit_all(indirect);
        self.submit(evaluator);
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("name", &self.inner.config.name)
            .field("task_count", &self.task_count())
            .finish()
    }
}

/// Builder for `Coordinator`
pub struct CoordinatorBuilder {
    config: QueueConfig,
    executor: Option<Arc<dyn Executor>>,
    exclusivity: Option<Arc<ExclusivityManager>>,
    delegate: Option<Weak<dyn QueueDelegate>>,
    owner: Option<Weak<Task>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            executor: None,
            exclusivity: None,
            delegate: None,
            owner: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom executor instead of a `TokioExecutor`
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use an isolated exclusivity registry instead of the shared one
    pub fn exclusivity(mut self, exclusivity: Arc<ExclusivityManager>) -> Self {
        self.exclusivity = Some(exclusivity);
        self
    }

    pub fn delegate<D: QueueDelegate + 'static>(mut self, delegate: &Arc<D>) -> Self {
        let delegate = Arc::downgrade(delegate);
        let delegate: Weak<dyn QueueDelegate> = delegate;
        self.delegate = Some(delegate);
        self
    }

    /// Route tasks produced on this queue to `group`
    pub(crate) fn owner(mut self, group: &TaskRef) -> Self {
        self.owner = Some(Arc::downgrade(group));
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        self.config.validate()?;
        let executor: Arc<dyn Executor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(TokioExecutor::new(&self.config)),
        };
        let exclusivity = self.exclusivity.unwrap_or_else(ExclusivityManager::shared);
        Ok(Coordinator::from_parts(
            self.config,
            executor,
            exclusivity,
            self.delegate,
            self.owner,
        ))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
