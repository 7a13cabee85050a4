// ABOUTME: Drives one dependency graph from submission to terminal state
// ABOUTME: Resolves contexts, starts each node once its dependencies settle and isolates failures

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::context::{ErrorDescriptor, FailureKind, TaskContext};
use super::dependency::{DependencyGraph, TaskNode};
use super::error::{EngineError, Result};
use super::factory::{ContextResolution, ResolvePolicy, TaskContextFactory};
use super::invoker::TaskInvoker;
use super::result::NodeOutcome;
use super::scheduler::TaskScheduler;
use crate::reporting::ReportRegistry;
use crate::task::{CancellationHandle, CancellationSignal, TaskScope};

/// Observes node transitions. Errors are logged and otherwise ignored.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn before_execution(&self, _context: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_execution(
        &self,
        _context: &TaskContext,
        _outcome: &NodeOutcome,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_cache_hit(&self, _context: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_skipped(&self, _task_type: &str, _reason: &ErrorDescriptor) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleConfig {
    pub fail_fast: bool,
    pub resolve: ResolvePolicy,
}

/// Everything a single node needs, shared by the spawned node jobs
#[derive(Clone)]
struct NodeRunner {
    factory: Arc<TaskContextFactory>,
    invoker: Arc<dyn TaskInvoker>,
    reports: Arc<ReportRegistry>,
    listeners: Arc<Vec<Arc<dyn LifecycleListener>>>,
    resolve: ResolvePolicy,
    fail_fast: bool,
    cancellation: CancellationSignal,
    /// Set by fail-fast; stops nodes that have not started yet
    abort: CancellationHandle,
}

struct NodeJob {
    graph: Arc<DependencyGraph>,
    index: usize,
    upstream: Vec<TaskContext>,
}

pub struct LifecycleManager {
    factory: Arc<TaskContextFactory>,
    invoker: Arc<dyn TaskInvoker>,
    reports: Arc<ReportRegistry>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    scheduler: TaskScheduler,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        factory: Arc<TaskContextFactory>,
        invoker: Arc<dyn TaskInvoker>,
        reports: Arc<ReportRegistry>,
        max_concurrent: usize,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            factory,
            invoker,
            reports,
            listeners: Vec::new(),
            scheduler: TaskScheduler::new(max_concurrent),
            config,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Execute every node of `graph`. Returns one outcome per node, in graph order.
    ///
    /// A node is started as soon as all of its own dependencies have settled; unrelated
    /// branches never wait for each other.
    pub async fn run(
        &self,
        graph: Arc<DependencyGraph>,
        cancellation: CancellationSignal,
    ) -> Result<Vec<NodeOutcome>> {
        let plan = graph.create_execution_plan()?;

        info!(
            "Execution plan: {} levels, {} tasks total, max parallelism: {}",
            plan.execution_depth(),
            plan.total_tasks,
            plan.max_parallelism()
        );

        let runner = NodeRunner {
            factory: Arc::clone(&self.factory),
            invoker: Arc::clone(&self.invoker),
            reports: Arc::clone(&self.reports),
            listeners: Arc::new(self.listeners.clone()),
            resolve: self.config.resolve,
            fail_fast: self.config.fail_fast,
            cancellation,
            abort: CancellationHandle::new(),
        };

        let mut outcomes: Vec<Option<NodeOutcome>> = vec![None; graph.len()];
        let mut completed: Vec<Option<TaskContext>> = vec![None; graph.len()];
        let mut unsettled: Vec<usize> = graph
            .nodes()
            .iter()
            .map(|node| node.dependencies.len())
            .collect();
        // ordered so ties start in declaration order
        let mut ready: BTreeSet<usize> = (0..graph.len())
            .filter(|&index| unsettled[index] == 0)
            .collect();
        let mut running = FuturesUnordered::new();

        loop {
            while let Some(index) = ready.pop_first() {
                let node = graph.node(index);

                let skip_reason = runner.stop_reason().or_else(|| {
                    node.dependencies
                        .iter()
                        .find(|&&dep| completed[dep].is_none())
                        .map(|&dep| {
                            ErrorDescriptor::new(
                                FailureKind::Upstream,
                                format!(
                                    "dependency {} did not complete",
                                    graph.node(dep).task_type()
                                ),
                            )
                        })
                });

                if let Some(reason) = skip_reason {
                    outcomes[index] = Some(runner.skip(node, reason).await);
                    settle(&graph, index, &mut unsettled, &mut ready);
                    continue;
                }

                let job = NodeJob {
                    graph: Arc::clone(&graph),
                    index,
                    upstream: node
                        .dependencies
                        .iter()
                        .filter_map(|&dep| completed[dep].clone())
                        .collect(),
                };
                let job_runner = runner.clone();
                let handle = self
                    .scheduler
                    .spawn(async move { job_runner.run_node(job).await });
                running.push(async move { (index, handle.await) });
            }

            let (index, result) = match running.next().await {
                Some(finished) => finished,
                None => break,
            };

            let node = graph.node(index);
            let outcome = match result {
                Ok((outcome, context)) => {
                    completed[index] = context;
                    outcome
                }
                Err(join_error) => {
                    // the body is panic-safe, so this only covers engine bugs
                    error!("Node {} aborted: {}", node.task_type(), join_error);
                    NodeOutcome::new(node.task_type(), Some(node.context_id.clone())).failed(
                        ErrorDescriptor::new(FailureKind::Internal, join_error.to_string()),
                    )
                }
            };

            if outcome.is_failed() {
                runner.abandon_if_fail_fast(node);
            }

            debug!("Node {} settled as {}", node.task_type(), outcome.status);
            outcomes[index] = Some(outcome);
            settle(&graph, index, &mut unsettled, &mut ready);
        }

        // every node settles exactly once
        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.ok_or_else(|| {
                    EngineError::SystemError(format!(
                        "node {} was never scheduled",
                        graph.node(index).task_type()
                    ))
                })
            })
            .collect()
    }
}

/// Record that `index` reached a terminal state and queue dependents that are now unblocked
fn settle(
    graph: &DependencyGraph,
    index: usize,
    unsettled: &mut [usize],
    ready: &mut BTreeSet<usize>,
) {
    for dependent in graph.dependents(index) {
        unsettled[dependent] -= 1;
        if unsettled[dependent] == 0 {
            ready.insert(dependent);
        }
    }
}

impl NodeRunner {
    fn stop_reason(&self) -> Option<ErrorDescriptor> {
        if self.cancellation.is_cancelled() {
            Some(ErrorDescriptor::new(
                FailureKind::Cancelled,
                "execution was cancelled",
            ))
        } else if self.abort.is_cancelled() {
            Some(ErrorDescriptor::new(
                FailureKind::Upstream,
                "abandoned after a failure (fail-fast)",
            ))
        } else {
            None
        }
    }

    async fn skip(&self, node: &TaskNode, reason: ErrorDescriptor) -> NodeOutcome {
        info!("Skipping {}: {}", node.task_type(), reason.message);
        for listener in self.listeners.iter() {
            if let Err(e) = listener.on_skipped(node.task_type(), &reason).await {
                warn!("Lifecycle listener failed on skip: {:#}", e);
            }
        }
        NodeOutcome::new(node.task_type(), Some(node.context_id.clone())).skipped(reason)
    }

    fn abandon_if_fail_fast(&self, node: &TaskNode) {
        if self.fail_fast && !self.abort.is_cancelled() {
            warn!(
                "Fail-fast: abandoning remaining graph after {} failed",
                node.task_type()
            );
            self.abort.cancel();
        }
    }

    async fn run_node(&self, job: NodeJob) -> (NodeOutcome, Option<TaskContext>) {
        let graph = Arc::clone(&job.graph);
        let node = graph.node(job.index);

        let (outcome, context) = self.execute_node(node, job.upstream).await;
        if outcome.is_failed() {
            self.abandon_if_fail_fast(node);
        }
        (outcome, context)
    }

    async fn execute_node(
        &self,
        node: &TaskNode,
        upstream: Vec<TaskContext>,
    ) -> (NodeOutcome, Option<TaskContext>) {
        // the scheduler may have held this node back behind others
        if let Some(reason) = self.stop_reason() {
            return (self.skip(node, reason).await, None);
        }

        let outcome = NodeOutcome::new(node.task_type(), Some(node.context_id.clone()));
        let upstream_ids = upstream.iter().map(|c| c.id.clone()).collect();

        let resolution = match self
            .factory
            .resolve(&node.configuration, upstream_ids, self.resolve)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                error!("Could not resolve context for {}: {}", node.task_type(), e);
                return (outcome.failed(ErrorDescriptor::from(&e)), None);
            }
        };

        let mut context = match resolution {
            ContextResolution::Existing(context) => {
                info!(
                    "Reusing completed context {} for {}",
                    context.id.short(),
                    node.task_type()
                );
                for listener in self.listeners.iter() {
                    if let Err(e) = listener.on_cache_hit(&context).await {
                        warn!("Lifecycle listener failed on cache hit: {:#}", e);
                    }
                }
                return (outcome.completed(true), Some(context));
            }
            ContextResolution::Created(context) => context,
        };

        if let Some(reason) = self.stop_reason() {
            self.release_unstarted(&mut context, &reason).await;
            return (self.skip(node, reason).await, None);
        }

        for listener in self.listeners.iter() {
            if let Err(e) = listener.before_execution(&context).await {
                warn!("Lifecycle listener failed before execution: {:#}", e);
            }
        }

        if let Err(e) = self.factory.mark_running(&mut context).await {
            let descriptor = ErrorDescriptor::from(&e);
            self.release_unstarted(&mut context, &descriptor).await;
            return (outcome.failed(descriptor), None);
        }

        info!(
            "Executing {} in context {}",
            node.task_type(),
            context.id.short()
        );

        let scope = TaskScope::new(
            context.clone(),
            upstream,
            self.factory.storage(),
            self.cancellation.clone(),
        );
        let body_result = self.invoke(node, &scope).await;
        for artifact in scope.written_artifacts().await {
            context.record_artifact(&artifact);
        }

        let (outcome, completed) = match body_result {
            Ok(()) => match self.factory.mark_completed(&mut context).await {
                Ok(()) => {
                    info!("Task {} completed", node.task_type());
                    let mut outcome = outcome.completed(false);
                    outcome.report_errors = self.run_reports(&mut context).await;
                    (outcome, Some(context.clone()))
                }
                Err(e) => {
                    error!("Could not record completion of {}: {}", node.task_type(), e);
                    (outcome.failed(ErrorDescriptor::from(&e)), None)
                }
            },
            Err(descriptor) => {
                let cancelled = self.cancellation.is_cancelled();
                error!("Task {} failed: {}", node.task_type(), descriptor);
                if let Err(e) = self
                    .factory
                    .mark_failed(&mut context, descriptor.clone(), cancelled)
                    .await
                {
                    error!("Could not record failure of {}: {}", node.task_type(), e);
                }
                (outcome.failed(descriptor), None)
            }
        };

        for listener in self.listeners.iter() {
            if let Err(e) = listener.after_execution(&context, &outcome).await {
                warn!("Lifecycle listener failed after execution: {:#}", e);
            }
        }

        (outcome, completed)
    }

    async fn invoke(
        &self,
        node: &TaskNode,
        scope: &TaskScope,
    ) -> std::result::Result<(), ErrorDescriptor> {
        let invocation = self.invoker.invoke(Arc::clone(&node.task), scope);

        let result = match node.task.timeout() {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => return Err(timeout_descriptor(limit)),
            },
            None => invocation.await,
        };

        result.map_err(|e| {
            let kind = if self.cancellation.is_cancelled() {
                FailureKind::Cancelled
            } else {
                FailureKind::Execution
            };
            let message = match e {
                EngineError::TaskExecution { message, .. } => message,
                other => other.to_string(),
            };
            ErrorDescriptor::new(kind, message)
        })
    }

    async fn run_reports(&self, context: &mut TaskContext) -> Vec<String> {
        let run = self.reports.run(context, self.factory.storage()).await;
        let mut errors = run.errors;

        if let Err(e) = self.factory.record_artifacts(context, &run.artifacts).await {
            warn!("Could not record report artifacts for {}: {}", context.id.short(), e);
            errors.push(e.to_string());
        }

        errors
    }

    /// Fail a context that was created but never started, so waiters are released
    async fn release_unstarted(&self, context: &mut TaskContext, reason: &ErrorDescriptor) {
        let cancelled = reason.kind == FailureKind::Cancelled;
        if let Err(e) = self
            .factory
            .mark_failed(context, reason.clone(), cancelled)
            .await
        {
            warn!("Could not release context {}: {}", context.id.short(), e);
        }
    }
}

fn timeout_descriptor(limit: Duration) -> ErrorDescriptor {
    ErrorDescriptor::new(
        FailureKind::Timeout,
        format!("task exceeded its timeout of {:?}", limit),
    )
}
