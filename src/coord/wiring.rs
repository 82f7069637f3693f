//! Dependency wiring for conditional tasks
//!
//! Edges planned at submission are collected in a graph first and checked for
//! cycles before any of them reaches the executor. An edge points from a task
//! to the task it waits for.

use std::collections::{HashMap, HashSet};

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::coord::executor::Executor;
use crate::coord::task::TaskRef;
use crate::coord::types::TaskId;

pub(crate) struct WiringPlan {
    graph: DiGraph<TaskId, ()>,
    nodes: HashMap<TaskId, NodeIndex>,
    edges: Vec<(TaskRef, TaskRef)>,
    seeded: HashSet<TaskId>,
}

impl WiringPlan {
    /// Plan over `tasks`, seeded with every dependency edge reachable from
    /// them, including edges through tasks outside this submission
    pub(crate) fn new<'a>(tasks: impl IntoIterator<Item = &'a TaskRef>) -> Self {
        let mut plan = Self {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            seeded: HashSet::new(),
        };
        for task in tasks {
            plan.seed(task);
        }
        plan
    }

    /// Walk the dependencies of `task` depth first and add the edges found.
    /// Finished tasks have dropped their dependencies, so the walk stops there.
    fn seed(&mut self, task: &TaskRef) {
        let mut stack = vec![task.clone()];
        while let Some(current) = stack.pop() {
            if !self.seeded.insert(current.id()) {
                continue;
            }
            let from = self.node(current.id());
            for dependency in current.dependencies() {
                let to = self.node(dependency.id());
                self.graph.update_edge(from, to, ());
                if !self.seeded.contains(&dependency.id()) {
                    stack.push(dependency);
                }
            }
        }
    }

    fn node(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&index) = self.nodes.get(&id) {
            return index;
        }
        let index = self.graph.add_node(id);
        self.nodes.insert(id, index);
        index
    }

    /// Plan `task -> dependency`. Returns false if the edge was dropped
    /// because it would be a self edge or close a cycle.
    pub(crate) fn add_edge(&mut self, task: &TaskRef, dependency: &TaskRef) -> bool {
        if task.id() == dependency.id() {
            return false;
        }
        self.seed(task);
        self.seed(dependency);
        let from = self.node(task.id());
        let to = self.node(dependency.id());
        if self.graph.contains_edge(from, to) {
            return true;
        }
        if has_path_connecting(&self.graph, to, from, None) {
            tracing::warn!(
                task = %task.id().short(),
                name = %task.name(),
                dependency = %dependency.name(),
                "dropping dependency that would create a cycle"
            );
            return false;
        }
        self.graph.add_edge(from, to, ());
        self.edges.push((task.clone(), dependency.clone()));
        true
    }

    /// Edges planned so far, in insertion order
    pub(crate) fn edges(&self) -> &[(TaskRef, TaskRef)] {
        &self.edges
    }

    /// Record every planned edge through `executor`
    pub(crate) fn apply(self, executor: &dyn Executor) {
        for (task, dependency) in &self.edges {
            executor.add_dependency(task, dependency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::executor::TokioExecutor;
    use crate::coord::task::Task;

    #[test]
    fn test_edges_are_deduplicated() {
        let a = Task::builder("a").build();
        let b = Task::builder("b").build();
        let mut plan = WiringPlan::new([&a, &b]);

        assert!(plan.add_edge(&a, &b));
        assert!(plan.add_edge(&a, &b));
        assert!(!plan.add_edge(&a, &a));
        assert_eq!(plan.edges().len(), 1);
    }

    #[test]
    fn test_cycle_closing_edge_is_dropped() {
        let a = Task::builder("a").build();
        let b = Task::builder("b").build();
        let c = Task::builder("c").build();
        let mut plan = WiringPlan::new([&a, &b, &c]);

        assert!(plan.add_edge(&a, &b));
        assert!(plan.add_edge(&b, &c));
        assert!(!plan.add_edge(&c, &a));
        assert_eq!(plan.edges().len(), 2);
    }

    #[test]
    fn test_existing_dependencies_are_seeded() {
        let holder = Task::builder("holder").build();
        let task = Task::builder("task").build();
        holder.add_dependency(task.clone());

        let mut plan = WiringPlan::new([&task, &holder]);
        assert!(!plan.add_edge(&task, &holder));
    }

    #[test]
    fn test_cycle_through_outside_task_is_detected() {
        let a = Task::builder("a").build();
        let x = Task::builder("x").dependency(a.clone()).build();
        let b = Task::builder("b").dependency(x.clone()).build();

        let mut plan = WiringPlan::new([&a, &b]);
        assert!(!plan.add_edge(&a, &b));
        assert!(plan.edges().is_empty());
    }

    #[test]
    fn test_dependencies_of_late_nodes_are_seeded() {
        let a = Task::builder("a").build();
        let x = Task::builder("x").dependency(a.clone()).build();
        let b = Task::builder("b").dependency(x).build();

        let mut plan = WiringPlan::new([&a]);
        assert!(!plan.add_edge(&a, &b));
    }

    #[test]
    fn test_apply_records_edges_on_tasks() {
        let a = Task::builder("a").build();
        let b = Task::builder("b").build();
        let mut plan = WiringPlan::new([&a]);
        plan.add_edge(&a, &b);
        plan.apply(&TokioExecutor::unbounded());

        assert_eq!(a.dependencies()[0].id(), b.id());
    }
}
