//! Mutual-exclusivity registry
//!
//! Maps each exclusivity category to the most recently submitted task in it.
//! Holders are stored weakly, so the registry never keeps a task alive.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::coord::task::{Task, TaskRef};

lazy_static::lazy_static! {
    static ref SHARED: Arc<ExclusivityManager> = Arc::new(ExclusivityManager::new());
}

/// Registry of the latest task per exclusivity category
pub struct ExclusivityManager {
    holders: Mutex<HashMap<String, Weak<Task>>>,
}

impl ExclusivityManager {
    /// Create an isolated registry
    pub fn new() -> Self {
        Self {
            holders: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry used by coordinators built without one
    pub fn shared() -> Arc<ExclusivityManager> {
        SHARED.clone()
    }

    /// Make `task` the holder of `category` and return the previous holder,
    /// if it is still alive
    pub fn register_and_get_previous(&self, task: &TaskRef, category: &str) -> Option<TaskRef> {
        self.register_all(task, &[category]).into_iter().next()
    }

    /// Register `task` in every category under one lock and return the
    /// distinct live previous holders, in category order.
    ///
    /// Registering all categories at once keeps two tasks sharing the same
    /// pair of categories from each waiting on the other.
    pub fn register_all<S: AsRef<str>>(&self, task: &TaskRef, categories: &[S]) -> Vec<TaskRef> {
        let mut holders = self.holders.lock();
        holders.retain(|_, holder| holder.strong_count() > 0);

        let mut previous: Vec<TaskRef> = Vec::new();
        for category in categories {
            let category = category.as_ref();
            let replaced = holders.insert(category.to_string(), Arc::downgrade(task));
            let Some(holder) = replaced.and_then(|weak| weak.upgrade()) else {
                continue;
            };
            if holder.id() == task.id() || previous.iter().any(|p| p.id() == holder.id()) {
                continue;
            }
            tracing::debug!(
                category,
                task = %task.id().short(),
                previous = %holder.id().short(),
                "exclusive category handed over"
            );
            previous.push(holder);
        }
        previous
    }

    /// Current live holder of `category`
    pub fn current(&self, category: &str) -> Option<TaskRef> {
        self.holders.lock().get(category).and_then(Weak::upgrade)
    }

    /// Drop entries whose holder has been reclaimed
    pub fn prune(&self) {
        self.holders.lock().retain(|_, holder| holder.strong_count() > 0);
    }

    /// Number of categories with a registered holder, including reclaimed ones
    /// that have not been pruned yet
    pub fn len(&self) -> usize {
        self.holders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.lock().is_empty()
    }
}

impl Default for ExclusivityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_returns_previous_holder() {
        let manager = ExclusivityManager::new();
        let first = Task::builder("first").build();
        let second = Task::builder("second").build();

        assert!(manager.register_and_get_previous(&first, "db").is_none());
        let previous = manager.register_and_get_previous(&second, "db").unwrap();
        assert_eq!(previous.id(), first.id());
        assert_eq!(manager.current("db").unwrap().id(), second.id());
    }

    #[test]
    fn test_registering_twice_is_not_its_own_predecessor() {
        let manager = ExclusivityManager::new();
        let task = Task::builder("task").build();
        manager.register_and_get_previous(&task, "db");
        assert!(manager.register_and_get_previous(&task, "db").is_none());
    }

    #[test]
    fn test_register_all_dedupes_previous_holders() {
        let manager = ExclusivityManager::new();
        let first = Task::builder("first").build();
        let second = Task::builder("second").build();

        assert!(manager.register_all(&first, &["a", "b"]).is_empty());
        let previous = manager.register_all(&second, &["a", "b", "c"]);
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].id(), first.id());
        assert_eq!(manager.len(), 3);
    }

    #[test]
    fn test_holders_are_weak() {
        let manager = ExclusivityManager::new();
        let task = Task::builder("short-lived").build();
        manager.register_and_get_previous(&task, "db");
        assert_eq!(Arc::strong_count(&task), 1);

        drop(task);
        assert!(manager.current("db").is_none());
        let next = Task::builder("next").build();
        assert!(manager.register_and_get_previous(&next, "db").is_none());

        drop(next);
        manager.prune();
        assert!(manager.is_empty());
    }

    #[test]
    fn test_shared_is_a_singleton() {
        assert!(Arc::ptr_eq(&ExclusivityManager::shared(), &ExclusivityManager::shared()));
    }
}
