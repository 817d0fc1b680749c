use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often, and how soon, a failed task is tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(default)]
    pub delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        delay: Duration::ZERO,
    };

    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    pub fn scheduled(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Delay before the next attempt, or `None` once `retries_done` used up the budget.
    pub fn next_retry(&self, retries_done: u32) -> Option<Duration> {
        if retries_done < self.max_retries {
            Some(self.delay)
        } else {
            None
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.max_retries > 0 && !self.delay.is_zero()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// What a run does once a task has failed for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBehavior {
    /// Stop submitting new work; the run ends with an error.
    #[default]
    Terminating,
    /// Skip everything downstream of the failed task, run the rest.
    NonTerminating,
}

/// Policy handed to a single `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub behavior: ExecutionBehavior,
}

impl ExecutionConfig {
    pub const TERMINATING: ExecutionConfig = ExecutionConfig {
        retry: RetryPolicy::NONE,
        behavior: ExecutionBehavior::Terminating,
    };

    pub const NON_TERMINATING: ExecutionConfig = ExecutionConfig {
        retry: RetryPolicy::NONE,
        behavior: ExecutionBehavior::NonTerminating,
    };

    pub fn immediate_retrying(self, count: u32) -> Self {
        Self {
            retry: RetryPolicy::immediate(count),
            ..self
        }
    }

    pub fn scheduled_retrying(self, count: u32, delay: Duration) -> Self {
        Self {
            retry: RetryPolicy::scheduled(count, delay),
            ..self
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.behavior == ExecutionBehavior::Terminating
    }

    pub fn is_non_terminating(&self) -> bool {
        self.behavior == ExecutionBehavior::NonTerminating
    }
}
