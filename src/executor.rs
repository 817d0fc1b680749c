use std::collections::{BTreeSet, VecDeque};
use std::io;

use tracing::{debug, error, info, warn};

use crate::{
    Dag, DepcuterError, ExecutionConfig, ExecutionEngine, ExecutionResult, ExecutionStatus, Node,
    NodeId, TaskProvider,
};

/// Lifecycle of a [`DependentTasksExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    /// A terminating failure or a stall stopped the run; the executor cannot be reused.
    Aborted,
}

/// Nodes that reached a terminal status during one `execute` call, in the
/// order they got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport<T> {
    pub processed: Vec<T>,
    pub errored: Vec<T>,
    pub skipped: Vec<T>,
}

impl<T> ExecutionReport<T> {
    pub fn is_success(&self) -> bool {
        self.errored.is_empty() && self.skipped.is_empty()
    }
}

/// Runs the tasks of a graph, each only after all of its dependencies succeeded.
///
/// Only this type touches node state. The engine runs task bodies and reports
/// back through [`ExecutionEngine::process_result`].
pub struct DependentTasksExecutor<T, R, E> {
    graph: Dag<T, R>,
    engine: E,
    provider: Box<dyn TaskProvider<T, R>>,
    processed: Vec<T>,
    errored: BTreeSet<T>,
    // Ready to run, held back while a task is in error under a terminating policy.
    parked: Vec<T>,
    pending: usize,
    state: RunState,
}

impl<T, R, E> DependentTasksExecutor<T, R, E>
where
    T: NodeId,
    R: Send + 'static,
    E: ExecutionEngine<T, R>,
{
    pub fn new(engine: E, provider: impl TaskProvider<T, R> + 'static) -> Self {
        Self {
            graph: Dag::new(),
            engine,
            provider: Box::new(provider),
            processed: Vec::new(),
            errored: BTreeSet::new(),
            parked: Vec::new(),
            pending: 0,
            state: RunState::NotStarted,
        }
    }

    pub fn add_independent(&mut self, id: T) {
        self.graph.add_independent(id);
    }

    pub fn add_dependency(&mut self, first: T, later: T) {
        self.graph.add_dependency(first, later);
    }

    pub fn add_as_dependency_to_all_initial_nodes(&mut self, id: T) {
        self.graph.add_as_dependency_to_all_initial_nodes(id);
    }

    pub fn add_as_dependent_on_all_leaf_nodes(&mut self, id: T) {
        self.graph.add_as_dependent_on_all_leaf_nodes(id);
    }

    pub fn graph(&self) -> &Dag<T, R> {
        &self.graph
    }

    /// Every node that reached a terminal status, across all runs, in completion order.
    pub fn processed_nodes(&self) -> &[T] {
        &self.processed
    }

    pub fn errored_ids(&self) -> &BTreeSet<T> {
        &self.errored
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn print<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        self.graph.print(out)
    }

    /// Runs every pending node of the graph.
    ///
    /// Nodes resolved by an earlier run are left as they are, so calling this
    /// again after adding nodes only schedules the new ones. Under a
    /// terminating policy the first task that exhausts its retries aborts the
    /// run with [`DepcuterError::Aborted`] and poisons the executor.
    ///
    /// A graph that can make no progress (a cycle, say) fails with
    /// [`DepcuterError::Stalled`] and poisons the executor the same way: the
    /// stuck nodes would stall every later run too.
    pub async fn execute(
        &mut self,
        config: &ExecutionConfig,
    ) -> Result<ExecutionReport<T>, DepcuterError> {
        match self.state {
            RunState::Aborted => {
                return Err(DepcuterError::IllegalState(
                    "executor was aborted by a failed task and cannot run again".to_string(),
                ));
            }
            RunState::Running => {
                return Err(DepcuterError::IllegalState(
                    "a previous execution never finished".to_string(),
                ));
            }
            RunState::NotStarted | RunState::Completed => {}
        }

        self.state = RunState::Running;
        self.engine.reset_errors().await;
        self.parked.clear();
        let run_start = self.processed.len();
        self.pending = self.graph.all_nodes().filter(|n| n.is_pending()).count();
        info!(
            pending = self.pending,
            behavior = ?config.behavior,
            max_retries = config.retry.max_retries,
            "starting execution"
        );

        self.submit_initial_frontier().await;

        while self.pending > 0 {
            let result = match self.engine.process_result().await {
                Ok(result) => result,
                Err(DepcuterError::NothingInFlight) => {
                    error!(pending = self.pending, "no task in flight, execution stalled");
                    self.state = RunState::Aborted;
                    return Err(DepcuterError::Stalled {
                        pending: self.pending,
                    });
                }
                Err(e) => {
                    error!(error = %e, "execution engine failed");
                    self.state = RunState::Aborted;
                    self.engine.shutdown();
                    return Err(e);
                }
            };
            self.handle_result(result, config).await?;
        }

        self.state = RunState::Completed;
        let report = self.report_since(run_start);
        info!(
            processed = report.processed.len(),
            errored = report.errored.len(),
            skipped = report.skipped.len(),
            "execution finished"
        );
        Ok(report)
    }

    async fn submit_initial_frontier(&mut self) {
        let mut ready = Vec::new();
        let mut doomed = Vec::new();
        for node in self.graph.all_nodes().filter(|n| n.is_pending()) {
            if dependencies_met(&self.graph, node) {
                ready.push(node.id().clone());
            } else if dependency_failed(&self.graph, node) {
                doomed.push(node.id().clone());
            }
        }

        // Left over from an earlier non-terminating run.
        for id in doomed {
            let Some(node) = self.graph.get_mut(&id) else {
                continue;
            };
            if !node.is_pending() {
                continue;
            }
            node.set_skipped();
            warn!(node = %id, "skipping task, a dependency did not succeed");
            self.finish(id.clone());
            self.skip_dependents(&id);
        }

        for id in ready {
            self.submit_task(id).await;
        }
    }

    async fn handle_result(
        &mut self,
        result: ExecutionResult<T, R>,
        config: &ExecutionConfig,
    ) -> Result<(), DepcuterError> {
        let ExecutionResult {
            id,
            value,
            status,
            error,
        } = result;

        let Some(node) = self.graph.get_mut(&id) else {
            warn!(node = %id, "result for unknown node ignored");
            return Ok(());
        };
        if node.status().is_terminal() {
            warn!(node = %id, status = ?node.status(), "result for resolved node ignored");
            return Ok(());
        }

        match status {
            ExecutionStatus::Success => {
                node.set_success(value);
                debug!(node = %id, "task succeeded");
                self.finish(id.clone());
                self.release_dependents(&id, config).await;
            }
            ExecutionStatus::Errored => {
                if let Some(delay) = config.retry.next_retry(node.retry_attempts()) {
                    let attempt = node.record_retry();
                    warn!(
                        node = %id,
                        attempt,
                        max_retries = config.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = error.as_deref().unwrap_or_default(),
                        "retrying failed task"
                    );
                    let task = self.provider.provide_task(&id);
                    if config.retry.is_scheduled() {
                        self.engine.submit_after(id, task, delay).await;
                    } else {
                        self.engine.submit(id, task).await;
                    }
                    return Ok(());
                }

                node.set_errored();
                self.finish(id.clone());
                self.errored.insert(id.clone());

                if config.is_terminating() {
                    error!(node = %id, "task failed, aborting execution");
                    self.state = RunState::Aborted;
                    self.engine.shutdown();
                    return Err(DepcuterError::Aborted { id: id.to_string() });
                }

                error!(node = %id, "task failed, skipping its dependents");
                self.skip_dependents(&id);
            }
        }
        Ok(())
    }

    async fn release_dependents(&mut self, id: &T, config: &ExecutionConfig) {
        if let Some(node) = self.graph.get(id) {
            let graph = &self.graph;
            self.parked.extend(
                node.outgoing()
                    .iter()
                    .filter(|next| {
                        graph
                            .get(next)
                            .is_some_and(|n| n.is_pending() && dependencies_met(graph, n))
                    })
                    .cloned(),
            );
        }

        if self.parked.is_empty() {
            return;
        }
        if config.is_terminating() && self.engine.is_any_task_in_error().await {
            debug!(parked = self.parked.len(), "holding back tasks while a task is in error");
            return;
        }

        for next in std::mem::take(&mut self.parked) {
            self.submit_task(next).await;
        }
    }

    /// Marks everything reachable from `id` as skipped, each node once.
    fn skip_dependents(&mut self, id: &T) {
        let mut queue: VecDeque<T> = self
            .graph
            .get(id)
            .map(|n| n.outgoing().iter().cloned().collect())
            .unwrap_or_default();

        while let Some(next) = queue.pop_front() {
            let Some(node) = self.graph.get_mut(&next) else {
                continue;
            };
            if !node.is_pending() {
                continue;
            }
            node.set_skipped();
            queue.extend(node.outgoing().iter().cloned());
            warn!(node = %next, cause = %id, "skipping task");
            self.finish(next);
        }
    }

    async fn submit_task(&mut self, id: T) {
        let task = self.provider.provide_task(&id);
        self.engine.submit(id, task).await;
    }

    fn finish(&mut self, id: T) {
        self.processed.push(id);
        self.pending -= 1;
    }

    fn report_since(&self, start: usize) -> ExecutionReport<T> {
        let processed = self.processed[start..].to_vec();
        let with_status = |pred: fn(&Node<T, R>) -> bool| -> Vec<T> {
            processed
                .iter()
                .filter(|id| self.graph.get(id).is_some_and(pred))
                .cloned()
                .collect()
        };
        let errored = with_status(Node::is_errored);
        let skipped = with_status(Node::is_skipped);

        ExecutionReport {
            processed,
            errored,
            skipped,
        }
    }
}

fn dependencies_met<T: NodeId, R>(graph: &Dag<T, R>, node: &Node<T, R>) -> bool {
    node.incoming()
        .iter()
        .all(|id| graph.get(id).is_some_and(Node::is_success))
}

fn dependency_failed<T: NodeId, R>(graph: &Dag<T, R>, node: &Node<T, R>) -> bool {
    node.incoming()
        .iter()
        .any(|id| graph.get(id).is_some_and(|n| n.is_errored() || n.is_skipped()))
}
