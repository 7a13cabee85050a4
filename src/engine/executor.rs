// ABOUTME: Top-level entry point that expands a root task and drives it to completion
// ABOUTME: Holds explicit references to the context factory, storage and report registry

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument};

use super::dependency::DependencyGraph;
use super::error::Result;
use super::factory::{ExistingRunningPolicy, ResolvePolicy, TaskContextFactory};
use super::invoker::{LocalInvoker, TaskInvoker};
use super::lifecycle::{LifecycleConfig, LifecycleListener, LifecycleManager};
use super::result::ExecutionResult;
use crate::reporting::ReportRegistry;
use crate::storage::StorageService;
use crate::task::{CancellationSignal, Task};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_concurrent: usize,
    pub fail_fast: bool,
    pub on_existing_running: ExistingRunningPolicy,
    #[serde(default, with = "humantime_serde")]
    pub wait_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            fail_fast: false,
            on_existing_running: ExistingRunningPolicy::Wait,
            wait_timeout: None,
        }
    }
}

impl EngineConfig {
    fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            on_existing_running: self.on_existing_running,
            wait_timeout: self.wait_timeout,
        }
    }
}

pub struct ExecutionEngine {
    config: EngineConfig,
    factory: Arc<TaskContextFactory>,
    reports: Arc<ReportRegistry>,
    lifecycle: LifecycleManager,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .finish()
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    storage: Arc<dyn StorageService>,
    factory: Option<Arc<TaskContextFactory>>,
    reports: ReportRegistry,
    invoker: Arc<dyn TaskInvoker>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a factory with other engines so their submissions coordinate on one in-flight index
    pub fn factory(mut self, factory: Arc<TaskContextFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn reports(mut self, reports: ReportRegistry) -> Self {
        self.reports = reports;
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn TaskInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> ExecutionEngine {
        let resolve = self.config.resolve_policy();
        let factory = self.factory.unwrap_or_else(|| {
            Arc::new(TaskContextFactory::new(self.storage).with_policy(resolve))
        });
        let reports = Arc::new(self.reports);

        let mut lifecycle = LifecycleManager::new(
            Arc::clone(&factory),
            self.invoker,
            Arc::clone(&reports),
            self.config.max_concurrent,
            LifecycleConfig {
                fail_fast: self.config.fail_fast,
                resolve,
            },
        );
        for listener in self.listeners {
            lifecycle.add_listener(listener);
        }

        ExecutionEngine {
            config: self.config,
            factory,
            reports,
            lifecycle,
        }
    }
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, storage: Arc<dyn StorageService>) -> Self {
        Self::builder(storage).config(config).build()
    }

    pub fn builder(storage: Arc<dyn StorageService>) -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            storage,
            factory: None,
            reports: ReportRegistry::new(),
            invoker: Arc::new(LocalInvoker::new()),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &Arc<TaskContextFactory> {
        &self.factory
    }

    pub fn storage(&self) -> Arc<dyn StorageService> {
        self.factory.storage()
    }

    pub fn reports(&self) -> &ReportRegistry {
        &self.reports
    }

    /// Expand the graph and compute every configuration without touching storage
    pub fn plan(&self, root: Arc<dyn Task>) -> Result<DependencyGraph> {
        let graph = DependencyGraph::from_root(root)?;
        graph.create_execution_plan()?;
        Ok(graph)
    }

    pub async fn execute(&self, root: Arc<dyn Task>) -> Result<ExecutionResult> {
        self.execute_with_cancellation(root, CancellationSignal::never())
            .await
    }

    /// Execute `root` and everything it depends on.
    ///
    /// Configuration errors and cycles fail the whole call before any storage write.
    /// Node failures are reported in the result instead.
    #[instrument(skip(self, root, cancellation), fields(root_task = %root.task_type()))]
    pub async fn execute_with_cancellation(
        &self,
        root: Arc<dyn Task>,
        cancellation: CancellationSignal,
    ) -> Result<ExecutionResult> {
        let start_time = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let root_task_type = root.task_type().to_string();

        info!(
            "Starting execution of {} (run_id: {})",
            root_task_type, run_id
        );

        let graph = Arc::new(self.plan(root)?);
        let mut result = ExecutionResult::new(run_id, root_task_type);

        for outcome in self.lifecycle.run(graph, cancellation).await? {
            result.add_node(outcome);
        }
        result.mark_completed();

        info!(
            "Execution completed in {:?} with status: {} ({} executed, {} cached, {} failed, {} skipped)",
            start_time.elapsed(),
            result.status,
            result.summary.executed_tasks,
            result.summary.cache_hits,
            result.summary.failed_tasks,
            result.summary.skipped_tasks
        );

        Ok(result)
    }

    /// Get executor statistics
    pub fn get_stats(&self) -> ExecutorStats {
        let resource_stats = self.lifecycle.scheduler().get_resource_stats();

        ExecutorStats {
            max_concurrent_tasks: resource_stats.max_concurrent,
            active_tasks: resource_stats.active_tasks,
            available_capacity: resource_stats.available_permits,
            utilization_percentage: resource_stats.utilization_percentage(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorStats {
    pub max_concurrent_tasks: usize,
    pub active_tasks: usize,
    pub available_capacity: usize,
    pub utilization_percentage: f64,
}
