use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{BoxTask, DepcuterError, ExecutionResult, NodeId};

/// Runs submitted tasks and hands back their results in completion order.
#[async_trait]
pub trait ExecutionEngine<T, R>: Send + Sync {
    /// Queues `task` for execution without waiting for it.
    async fn submit(&mut self, id: T, task: BoxTask<R>);

    /// Queues `task` once `delay` has elapsed, without waiting for either.
    async fn submit_after(&mut self, id: T, task: BoxTask<R>, delay: Duration);

    /// Waits for the next finished attempt, whichever that is.
    async fn process_result(&mut self) -> Result<ExecutionResult<T, R>, DepcuterError>;

    async fn is_any_task_in_error(&self) -> bool;

    async fn reset_errors(&mut self);

    /// Drops queued and delayed work. Tasks already running are left alone.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { concurrency }
    }
}

impl EngineConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }
}

struct Job<T, R> {
    id: T,
    task: BoxTask<R>,
}

/// Fixed pool of tokio workers sharing one FIFO job queue.
///
/// Must be created from within a tokio runtime.
pub struct DefaultExecutionEngine<T, R> {
    jobs: mpsc::UnboundedSender<Job<T, R>>,
    completions: mpsc::UnboundedReceiver<ExecutionResult<T, R>>,
    errored: Arc<Mutex<HashSet<T>>>,
    outstanding: usize,
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl<T: NodeId, R: Send + 'static> DefaultExecutionEngine<T, R> {
    pub fn new(config: EngineConfig) -> Self {
        let (jobs, job_rx) = mpsc::unbounded_channel::<Job<T, R>>();
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let errored = Arc::new(Mutex::new(HashSet::new()));
        let token = CancellationToken::new();

        let workers = (0..config.concurrency.max(1))
            .map(|_| {
                tokio::spawn(Self::worker(
                    Arc::clone(&job_rx),
                    completion_tx.clone(),
                    Arc::clone(&errored),
                    token.clone(),
                ))
            })
            .collect();

        Self {
            jobs,
            completions,
            errored,
            outstanding: 0,
            token,
            workers,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.workers.len()
    }

    async fn worker(
        jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job<T, R>>>>,
        completions: mpsc::UnboundedSender<ExecutionResult<T, R>>,
        errored: Arc<Mutex<HashSet<T>>>,
        token: CancellationToken,
    ) {
        loop {
            let job = tokio::select! {
                _ = token.cancelled() => break,
                job = async { jobs.lock().await.recv().await } => job,
            };
            let Some(job) = job else { break };

            let result = Self::run_job(job, &errored).await;
            if completions.send(result).is_err() {
                break;
            }
        }
    }

    async fn run_job(job: Job<T, R>, errored: &Mutex<HashSet<T>>) -> ExecutionResult<T, R> {
        let Job { id, task } = job;
        debug!(node = %id, "executing task");

        let outcome = AssertUnwindSafe(task.execute()).catch_unwind().await;
        match outcome {
            Ok(Ok(value)) => {
                errored.lock().await.remove(&id);
                ExecutionResult::success(id, value)
            }
            Ok(Err(e)) => {
                error!(node = %id, error = %e, "task execution failed");
                errored.lock().await.insert(id.clone());
                ExecutionResult::errored(id, e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task panicked".to_string());
                error!(node = %id, error = %message, "task panicked");
                errored.lock().await.insert(id.clone());
                ExecutionResult::errored(id, message)
            }
        }
    }
}

#[async_trait]
impl<T: NodeId, R: Send + 'static> ExecutionEngine<T, R> for DefaultExecutionEngine<T, R> {
    async fn submit(&mut self, id: T, task: BoxTask<R>) {
        debug!(node = %id, "submitting task");
        self.outstanding += 1;
        if self.jobs.send(Job { id, task }).is_err() {
            // Workers are gone; process_result reports the closed channel.
            error!("job queue closed, task dropped");
        }
    }

    async fn submit_after(&mut self, id: T, task: BoxTask<R>, delay: Duration) {
        if delay.is_zero() {
            return self.submit(id, task).await;
        }

        debug!(node = %id, delay_ms = delay.as_millis() as u64, "scheduling task");
        self.outstanding += 1;
        let jobs = self.jobs.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = jobs.send(Job { id, task });
                }
            }
        });
    }

    async fn process_result(&mut self) -> Result<ExecutionResult<T, R>, DepcuterError> {
        if self.outstanding == 0 {
            return Err(DepcuterError::NothingInFlight);
        }

        let result = self.completions.recv().await.ok_or_else(|| {
            DepcuterError::TaskExecution("Completion channel closed".to_string())
        })?;
        self.outstanding -= 1;
        Ok(result)
    }

    async fn is_any_task_in_error(&self) -> bool {
        !self.errored.lock().await.is_empty()
    }

    async fn reset_errors(&mut self) {
        self.errored.lock().await.clear();
    }

    fn shutdown(&mut self) {
        self.token.cancel();
    }
}

impl<T, R> Drop for DefaultExecutionEngine<T, R> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionStatus, Task};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct Sleepy {
        value: u32,
        millis: u64,
    }

    #[async_trait]
    impl Task<u32> for Sleepy {
        async fn execute(&self) -> Result<u32, DepcuterError> {
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            Ok(self.value)
        }
    }

    struct Failing;

    #[async_trait]
    impl Task<u32> for Failing {
        async fn execute(&self) -> Result<u32, DepcuterError> {
            Err(DepcuterError::TaskExecution("boom".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Task<u32> for Panicking {
        async fn execute(&self) -> Result<u32, DepcuterError> {
            panic!("kaboom")
        }
    }

    struct FailOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Task<u32> for FailOnce {
        async fn execute(&self) -> Result<u32, DepcuterError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DepcuterError::TaskExecution("first try".to_string()))
            } else {
                Ok(7)
            }
        }
    }

    #[tokio::test]
    async fn results_arrive_in_completion_order() {
        let mut engine = DefaultExecutionEngine::<u32, u32>::new(EngineConfig::with_concurrency(4));
        engine.submit(1, Arc::new(Sleepy { value: 1, millis: 200 })).await;
        engine.submit(2, Arc::new(Sleepy { value: 2, millis: 10 })).await;

        let first = engine.process_result().await.unwrap();
        let second = engine.process_result().await.unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(second.id, 1);
        assert_eq!(second.value, Some(1));
    }

    #[tokio::test]
    async fn single_worker_keeps_submission_order() {
        let mut engine = DefaultExecutionEngine::<u32, u32>::new(EngineConfig::with_concurrency(1));
        assert_eq!(engine.concurrency(), 1);
        engine.submit(1, Arc::new(Sleepy { value: 1, millis: 50 })).await;
        engine.submit(2, Arc::new(Sleepy { value: 2, millis: 0 })).await;
        engine.submit(3, Arc::new(Sleepy { value: 3, millis: 10 })).await;

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(engine.process_result().await.unwrap().id);
        }
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failures_become_errored_results() {
        let mut engine = DefaultExecutionEngine::<u32, u32>::new(EngineConfig::with_concurrency(2));
        engine.submit(1, Arc::new(Failing)).await;

        let result = engine.process_result().await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Errored);
        assert!(result.value.is_none());
        assert!(result.error.unwrap().contains("boom"));
        assert!(engine.is_any_task_in_error().await);

        engine.reset_errors().await;
        assert!(!engine.is_any_task_in_error().await);
    }

    #[tokio::test]
    async fn panics_become_errored_results() {
        let mut engine = DefaultExecutionEngine::<u32, u32>::new(EngineConfig::with_concurrency(1));
        engine.submit(9, Arc::new(Panicking)).await;
        engine.submit(10, Arc::new(Sleepy { value: 10, millis: 0 })).await;

        let result = engine.process_result().await.unwrap();
        assert_eq!(result.id, 9);
        assert_eq!(result.status, ExecutionStatus::Errored);
        assert_eq!(result.error.as_deref(), Some("kaboom"));

        let next = engine.process_result().await.unwrap();
        assert!(next.is_success());
    }

    #[tokio::test]
    async fn successful_retry_clears_error() {
        let mut engine = DefaultExecutionEngine::<u32, u32>::new(EngineConfig::with_concurrency(1));
        let task: BoxTask<u32> = Arc::new(FailOnce {
            calls: AtomicU32::new(0),
        });

        engine.submit(5, Arc::clone(&task)).await;
        assert!(!engine.process_result().await.unwrap().is_success());
        assert!(engine.is_any_task_in_error().await);

        engine.submit(5, task).await;
        let retried = engine.process_result().await.unwrap();
        assert_eq!(retried.value, Some(7));
        assert!(!engine.is_any_task_in_error().await);
    }

    #[tokio::test]
    async fn delayed_submission_waits() {
        let mut engine = DefaultExecutionEngine::<u32, u32>::new(EngineConfig::with_concurrency(1));
        let started = Instant::now();
        engine
            .submit_after(1, Arc::new(Sleepy { value: 1, millis: 0 }), Duration::from_millis(50))
            .await;

        let result = engine.process_result().await.unwrap();
        assert!(result.is_success());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn nothing_in_flight() {
        let mut engine = DefaultExecutionEngine::<u32, u32>::new(EngineConfig::default());
        assert!(matches!(
            engine.process_result().await,
            Err(DepcuterError::NothingInFlight)
        ));
    }
}
