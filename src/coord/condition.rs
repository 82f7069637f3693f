//! Conditions gate a task's execution
//!
//! A condition is evaluated by the task's condition evaluator after all of
//! the condition's indirect dependencies have finished. A failing condition
//! cancels the task before its body runs.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::coord::task::TaskRef;
use crate::core::errors::TaskError;

/// Outcome of evaluating a condition
pub type ConditionResult = std::result::Result<(), TaskError>;

/// Condition-authoring contract
#[async_trait]
pub trait Condition: Send + Sync {
    /// Name used in error reports
    fn name(&self) -> &str;

    /// Whether tasks carrying this condition must not run concurrently with
    /// other tasks in the same `category`
    fn is_mutually_exclusive(&self) -> bool {
        false
    }

    /// Exclusivity category, only meaningful if mutually exclusive
    fn category(&self) -> &str {
        self.name()
    }

    /// Auxiliary tasks that must finish before this condition is evaluated
    fn indirect_dependencies(&self, _task: &TaskRef) -> Vec<TaskRef> {
        Vec::new()
    }

    /// Evaluate the condition for `task`
    async fn evaluate(&self, task: &TaskRef) -> ConditionResult;
}

/// Only one task per category runs at a time. Always evaluates to success;
/// the ordering comes from the dependency wiring done at submission.
pub struct MutuallyExclusive {
    name: String,
    category: String,
}

impl MutuallyExclusive {
    pub fn new(category: impl Into<String>) -> Self {
        let category = category.into();
        Self {
            name: format!("MutuallyExclusive<{}>", category),
            category,
        }
    }
}

#[async_trait]
impl Condition for MutuallyExclusive {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_mutually_exclusive(&self) -> bool {
        true
    }

    fn category(&self) -> &str {
        &self.category
    }

    async fn evaluate(&self, _task: &TaskRef) -> ConditionResult {
        Ok(())
    }
}

/// Fails if any finished dependency was cancelled or finished with errors.
///
/// By default a task still runs when its dependencies failed; attach this
/// condition to opt out.
pub struct NoFailedDependencies;

#[async_trait]
impl Condition for NoFailedDependencies {
    fn name(&self) -> &str {
        "NoFailedDependencies"
    }

    async fn evaluate(&self, task: &TaskRef) -> ConditionResult {
        let failed: Vec<String> = task
            .dependencies()
            .iter()
            .filter(|dep| dep.is_finished() && (dep.is_cancelled() || dep.failed()))
            .map(|dep| dep.name().to_string())
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(TaskError::dependency_failed(failed.join(", ")))
        }
    }
}

type EvaluateFn =
    Box<dyn Fn(TaskRef) -> Pin<Box<dyn Future<Output = ConditionResult> + Send>> + Send + Sync>;
type DependencyFn = Box<dyn Fn(&TaskRef) -> Option<TaskRef> + Send + Sync>;

/// Condition built from an async closure
pub struct FnCondition {
    name: String,
    category: Option<String>,
    evaluate: EvaluateFn,
    dependency: Option<DependencyFn>,
}

impl FnCondition {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConditionResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            category: None,
            evaluate: Box::new(move |task| Box::pin(f(task))),
            dependency: None,
        }
    }

    /// Condition that fails with `reason` when `predicate` returns false
    pub fn check<F>(name: impl Into<String>, reason: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&TaskRef) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let reason = reason.into();
        let condition = name.clone();
        Self::new(name, move |task| {
            let outcome = if predicate(&task) {
                Ok(())
            } else {
                Err(TaskError::condition_failed(condition.clone(), reason.clone()))
            };
            async move { outcome }
        })
    }

    /// Make the condition mutually exclusive within `category`
    pub fn exclusive(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Supply an indirect dependency for each task the condition gates
    pub fn with_dependency<F>(mut self, f: F) -> Self
    where
        F: Fn(&TaskRef) -> Option<TaskRef> + Send + Sync + 'static,
    {
        self.dependency = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl Condition for FnCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_mutually_exclusive(&self) -> bool {
        self.category.is_some()
    }

    fn category(&self) -> &str {
        self.category.as_deref().unwrap_or(&self.name)
    }

    fn indirect_dependencies(&self, task: &TaskRef) -> Vec<TaskRef> {
        self.dependency
            .as_ref()
            .and_then(|f| f(task))
            .into_iter()
            .collect()
    }

    async fn evaluate(&self, task: &TaskRef) -> ConditionResult {
        (self.evaluate)(task.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::task::Task;

    #[tokio::test]
    async fn test_mutually_exclusive() {
        let condition = MutuallyExclusive::new("db");
        let task = Task::builder("writer").build();
        assert!(condition.is_mutually_exclusive());
        assert_eq!(condition.category(), "db");
        assert_eq!(condition.name(), "MutuallyExclusive<db>");
        assert!(condition.evaluate(&task).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_failed_dependencies() {
        let ok = Task::builder("ok").build();
        let failed = Task::builder("failed").build();
        let cancelled = Task::builder("cancelled").build();
        let pending = Task::builder("pending").build();
        pending.cancel();

        ok.finish_with_errors(Vec::new());
        failed.finish_with_errors(vec![TaskError::execution("boom")]);
        cancelled.cancel();
        cancelled.finish_with_errors(Vec::new());

        let clean = Task::builder("clean")
            .dependency(ok.clone())
            .dependency(pending)
            .build();
        assert!(NoFailedDependencies.evaluate(&clean).await.is_ok());

        let dirty = Task::builder("dirty")
            .dependency(ok)
            .dependency(failed)
            .dependency(cancelled)
            .build();
        assert_eq!(
            NoFailedDependencies.evaluate(&dirty).await,
            Err(TaskError::dependency_failed("failed, cancelled"))
        );
    }

    #[tokio::test]
    async fn test_fn_condition() {
        let task = Task::builder("gated").build();
        let passing = FnCondition::check("always", "never fails", |_| true);
        let failing = FnCondition::check("never", "offline", |_| false).exclusive("net");

        assert!(!passing.is_mutually_exclusive());
        assert_eq!(passing.category(), "always");
        assert!(passing.evaluate(&task).await.is_ok());

        assert!(failing.is_mutually_exclusive());
        assert_eq!(failing.category(), "net");
        assert_eq!(
            failing.evaluate(&task).await,
            Err(TaskError::condition_failed("never", "offline"))
        );
    }

    #[test]
    fn test_fn_condition_dependency() {
        let task = Task::builder("gated").build();
        let condition = FnCondition::check("lookup", "denied", |_| true)
            .with_dependency(|t| Some(Task::builder(format!("lookup for {}", t.name())).build()));

        let deps = condition.indirect_dependencies(&task);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name(), "lookup for gated");
    }
}
