//! Condition evaluation as a task
//!
//! Every conditional task gets a companion evaluator task. The task depends on
//! its evaluator, so the body never runs before every condition has passed.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;

use crate::coord::task::{Task, TaskCtx, TaskRef, Work};
use crate::core::errors::TaskError;

/// Evaluate every condition of `task` concurrently. Failures are returned in
/// condition declaration order.
pub async fn evaluate_conditions(task: &TaskRef) -> Vec<TaskError> {
    let outcomes = join_all(task.conditions().iter().map(|condition| {
        let condition = condition.clone();
        let task = task.clone();
        async move { condition.evaluate(&task).await }
    }))
    .await;

    outcomes.into_iter().filter_map(|outcome| outcome.err()).collect()
}

/// Work of an evaluator task. Holds its target weakly.
struct ConditionEvaluator {
    target: Weak<Task>,
}

#[async_trait]
impl Work for ConditionEvaluator {
    async fn run(&self, _ctx: &TaskCtx) -> anyhow::Result<()> {
        let Some(target) = self.target.upgrade() else {
            return Ok(());
        };
        if target.is_cancelled() {
            tracing::debug!(task = %target.id().short(), "target already cancelled, skipping conditions");
            return Ok(());
        }

        let failures = evaluate_conditions(&target).await;
        if !failures.is_empty() {
            tracing::info!(
                task = %target.id().short(),
                name = %target.name(),
                failures = failures.len(),
                "conditions failed, cancelling task"
            );
            target.cancel_with_errors(failures);
        }
        Ok(())
    }
}

/// Build the evaluator task for `task`
pub(crate) fn evaluator_for(task: &TaskRef) -> TaskRef {
    Task::builder(format!("evaluate conditions: {}", task.name()))
        .work(ConditionEvaluator {
            target: Arc::downgrade(task),
        })
        .build()
}
