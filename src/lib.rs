pub mod task;
pub mod retry;
pub mod cycle_check;
pub mod graph;
pub mod engine;
pub mod executor;

pub use task::{Task, TaskProvider, ExecutionResult, ExecutionStatus};
pub use retry::{RetryPolicy, ExecutionBehavior, ExecutionConfig};
pub use graph::{Dag, Node, NodeStatus};
pub use engine::{ExecutionEngine, DefaultExecutionEngine, EngineConfig};
pub use executor::{DependentTasksExecutor, ExecutionReport, RunState};
pub use cycle_check::has_cycle;

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

pub type BoxTask<R> = Arc<dyn Task<R>>;

/// Anything usable as a node identifier.
pub trait NodeId: Clone + Eq + Hash + Ord + Debug + Display + Send + Sync + 'static {}

impl<T> NodeId for T where T: Clone + Eq + Hash + Ord + Debug + Display + Send + Sync + 'static {}

#[derive(Error, Debug)]
pub enum DepcuterError {
    #[error("Task execution failed: {0}")]
    TaskExecution(String),
    #[error("Illegal state: {0}")]
    IllegalState(String),
    #[error("Execution aborted, task {id} failed")]
    Aborted { id: String },
    #[error("Execution stalled with {pending} pending task(s), check the graph for cycles")]
    Stalled { pending: usize },
    #[error("No task is in flight")]
    NothingInFlight,
}
