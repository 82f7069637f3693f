//! Task coordination
//!
//! Admission of tasks into an executor, with condition gating, mutual
//! exclusion between categories, lifecycle observers and group tasks.

pub mod condition;
pub mod coordinator;
pub mod evaluator;
pub mod exclusivity;
pub mod executor;
pub mod group;
pub mod hooks;
pub mod task;
pub mod types;
mod wiring;

pub use condition::*;
pub use coordinator::*;
pub use evaluator::evaluate_conditions;
pub use exclusivity::*;
pub use executor::*;
pub use group::*;
pub use hooks::*;
pub use task::*;
pub use types::*;
