// ABOUTME: Metrics collection for graph executions, fed by lifecycle callbacks
// ABOUTME: Tracks executions, cache hits, failures and per task type timings

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::engine::context::{ErrorDescriptor, FailureKind, TaskContext};
use crate::engine::lifecycle::LifecycleListener;
use crate::engine::result::NodeOutcome;

#[derive(Debug, Clone)]
pub struct MetricsCollector {
    node_metrics: Arc<RwLock<VecDeque<NodeMetrics>>>,
    execution_metrics: Arc<RwLock<ExecutionMetrics>>,
    retention_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub task_type: String,
    pub context_id: Option<String>,
    pub status: String,
    pub cache_hit: bool,
    pub recorded_at: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub executed: u64,
    pub completed: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub skipped: u64,
    pub report_failures: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub by_task_type: BTreeMap<String, TaskTypeMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTypeMetrics {
    pub executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cache_hits: u64,
    pub total_duration: Duration,
    pub avg_duration: Option<Duration>,
    pub success_rate: f64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            node_metrics: Arc::new(RwLock::new(VecDeque::new())),
            execution_metrics: Arc::new(RwLock::new(ExecutionMetrics::default())),
            retention_limit: 10000,
        }
    }

    pub fn with_retention_limit(mut self, limit: usize) -> Self {
        self.retention_limit = limit;
        self
    }

    async fn push(&self, metrics: NodeMetrics) {
        let mut node_metrics = self.node_metrics.write().await;
        node_metrics.push_back(metrics);

        while node_metrics.len() > self.retention_limit {
            node_metrics.pop_front();
        }
    }

    pub async fn get_execution_summary(&self) -> ExecutionMetrics {
        self.execution_metrics.read().await.clone()
    }

    /// Most recent node records first, optionally filtered by task type
    pub async fn get_node_metrics(&self, task_type: Option<&str>, limit: Option<usize>) -> Vec<NodeMetrics> {
        let node_metrics = self.node_metrics.read().await;
        let mut filtered: Vec<NodeMetrics> = node_metrics
            .iter()
            .rev()
            .filter(|m| task_type.map_or(true, |t| m.task_type == t))
            .cloned()
            .collect();

        if let Some(limit) = limit {
            filtered.truncate(limit);
        }
        filtered
    }

    pub async fn reset_metrics(&self) {
        self.node_metrics.write().await.clear();
        *self.execution_metrics.write().await = ExecutionMetrics::default();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTypeMetrics {
    fn record_execution(&mut self, outcome: &NodeOutcome) {
        self.executions += 1;
        if outcome.is_completed() {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }

        if let Some(duration) = outcome.duration {
            self.total_duration += duration;
        }
        self.avg_duration = Some(self.total_duration / self.executions as u32);
        self.success_rate = (self.successful_executions as f64 / self.executions as f64) * 100.0;
    }
}

#[async_trait]
impl LifecycleListener for MetricsCollector {
    async fn after_execution(
        &self,
        context: &TaskContext,
        outcome: &NodeOutcome,
    ) -> anyhow::Result<()> {
        {
            let mut metrics = self.execution_metrics.write().await;
            metrics.executed += 1;
            if outcome.is_completed() {
                metrics.completed += 1;
            } else {
                metrics.failed += 1;
            }
            if let Some(error) = &outcome.error {
                *metrics
                    .failures_by_kind
                    .entry(error.kind.to_string())
                    .or_default() += 1;
            }
            metrics.report_failures += outcome.report_errors.len() as u64;
            metrics
                .by_task_type
                .entry(context.task_type.clone())
                .or_default()
                .record_execution(outcome);
        }

        self.push(NodeMetrics {
            task_type: context.task_type.clone(),
            context_id: Some(context.id.to_string()),
            status: outcome.status.to_string(),
            cache_hit: false,
            recorded_at: Utc::now(),
            duration: outcome.duration,
            error_message: outcome.error.as_ref().map(|e| e.message.clone()),
        })
        .await;

        Ok(())
    }

    async fn on_cache_hit(&self, context: &TaskContext) -> anyhow::Result<()> {
        {
            let mut metrics = self.execution_metrics.write().await;
            metrics.cache_hits += 1;
            metrics
                .by_task_type
                .entry(context.task_type.clone())
                .or_default()
                .cache_hits += 1;
        }

        self.push(NodeMetrics {
            task_type: context.task_type.clone(),
            context_id: Some(context.id.to_string()),
            status: "completed".to_string(),
            cache_hit: true,
            recorded_at: Utc::now(),
            duration: None,
            error_message: None,
        })
        .await;

        Ok(())
    }

    async fn on_skipped(&self, task_type: &str, reason: &ErrorDescriptor) -> anyhow::Result<()> {
        {
            let mut metrics = self.execution_metrics.write().await;
            metrics.skipped += 1;
            if reason.kind == FailureKind::Cancelled {
                *metrics
                    .failures_by_kind
                    .entry(reason.kind.to_string())
                    .or_default() += 1;
            }
        }

        self.push(NodeMetrics {
            task_type: task_type.to_string(),
            context_id: None,
            status: "skipped".to_string(),
            cache_hit: false,
            recorded_at: Utc::now(),
            duration: None,
            error_message: Some(reason.message.clone()),
        })
        .await;

        Ok(())
    }
}
