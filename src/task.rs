use async_trait::async_trait;
use crate::{BoxTask, DepcuterError};

/// A unit of work run by the engine once per attempt.
#[async_trait]
pub trait Task<R>: Send + Sync {
    async fn execute(&self) -> Result<R, DepcuterError>;
}

/// Maps a node id to the task that does its work.
///
/// Called for every submission, retries included, so implementations may hand
/// out a fresh task each time or keep returning the same one.
pub trait TaskProvider<T, R>: Send + Sync {
    fn provide_task(&self, id: &T) -> BoxTask<R>;
}

impl<T, R, F> TaskProvider<T, R> for F
where
    F: Fn(&T) -> BoxTask<R> + Send + Sync,
{
    fn provide_task(&self, id: &T) -> BoxTask<R> {
        self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Errored,
}

/// Outcome of one task attempt, as delivered by the engine.
#[derive(Debug, Clone)]
pub struct ExecutionResult<T, R> {
    pub id: T,
    pub value: Option<R>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

impl<T, R> ExecutionResult<T, R> {
    pub fn success(id: T, value: R) -> Self {
        Self {
            id,
            value: Some(value),
            status: ExecutionStatus::Success,
            error: None,
        }
    }

    pub fn errored(id: T, error: impl Into<String>) -> Self {
        Self {
            id,
            value: None,
            status: ExecutionStatus::Errored,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
