// ABOUTME: Per-node outcomes and the aggregated result of one graph execution
// ABOUTME: Enumerates every node with its status, context id, cache use and errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::context::ErrorDescriptor;
use crate::discriminator::ContextId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub task_type: String,
    pub status: NodeStatus,
    pub context_id: Option<ContextId>,
    /// The configuration was already completed and the body did not run
    pub cache_hit: bool,
    pub error: Option<ErrorDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub report_errors: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub root_task_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub status: ExecutionStatus,
    pub nodes: Vec<NodeOutcome>,
    pub summary: ExecutionSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub executed_tasks: usize,
    pub cache_hits: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub success_rate: f64,
}

impl NodeOutcome {
    pub fn new(task_type: impl Into<String>, context_id: Option<ContextId>) -> Self {
        Self {
            task_type: task_type.into(),
            status: NodeStatus::Skipped,
            context_id,
            cache_hit: false,
            error: None,
            report_errors: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
        }
    }

    pub fn completed(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self.finish(NodeStatus::Completed, None)
    }

    pub fn failed(self, error: ErrorDescriptor) -> Self {
        self.finish(NodeStatus::Failed, Some(error))
    }

    pub fn skipped(self, reason: ErrorDescriptor) -> Self {
        self.finish(NodeStatus::Skipped, Some(reason))
    }

    fn finish(mut self, status: NodeStatus, error: Option<ErrorDescriptor>) -> Self {
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.end_time = Some(now);
        self.duration = Some((now - self.start_time).to_std().unwrap_or(Duration::ZERO));
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == NodeStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == NodeStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == NodeStatus::Skipped
    }
}

impl ExecutionResult {
    pub fn new(run_id: String, root_task_type: String) -> Self {
        Self {
            run_id,
            root_task_type,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            status: ExecutionStatus::Running,
            nodes: Vec::new(),
            summary: ExecutionSummary::default(),
        }
    }

    pub fn add_node(&mut self, outcome: NodeOutcome) {
        self.nodes.push(outcome);
        self.update_summary();
    }

    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.duration = Some((now - self.start_time).to_std().unwrap_or(Duration::ZERO));
        self.update_status();
        self.update_summary();
    }

    /// Outcome of the submitted task itself
    pub fn root(&self) -> Option<&NodeOutcome> {
        self.nodes.last()
    }

    /// First node of the given task type, in execution order
    pub fn node(&self, task_type: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.task_type == task_type)
    }

    pub fn context_id(&self, task_type: &str) -> Option<&ContextId> {
        self.node(task_type).and_then(|n| n.context_id.as_ref())
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn has_failures(&self) -> bool {
        self.nodes.iter().any(|n| !n.is_completed())
    }

    fn update_status(&mut self) {
        let has_failed = self.has_failures();
        let has_success = self.nodes.iter().any(|n| n.is_completed());

        self.status = match (has_failed, has_success) {
            (false, _) => ExecutionStatus::Success,
            (true, true) => ExecutionStatus::PartialSuccess,
            (true, false) => ExecutionStatus::Failed,
        };
    }

    fn update_summary(&mut self) {
        let total = self.nodes.len();
        let completed = self.nodes.iter().filter(|n| n.is_completed()).count();
        let cache_hits = self.nodes.iter().filter(|n| n.cache_hit).count();

        let success_rate = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        self.summary = ExecutionSummary {
            total_tasks: total,
            completed_tasks: completed,
            executed_tasks: completed - cache_hits,
            cache_hits,
            failed_tasks: self.nodes.iter().filter(|n| n.is_failed()).count(),
            skipped_tasks: self.nodes.iter().filter(|n| n.is_skipped()).count(),
            success_rate,
        };
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Completed => write!(f, "completed"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::PartialSuccess => write!(f, "partial_success"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::FailureKind;

    #[test]
    fn test_node_outcome_lifecycle() {
        let outcome = NodeOutcome::new("Train", None);
        assert!(outcome.is_skipped());
        assert!(outcome.end_time.is_none());

        let outcome = outcome.completed(true);
        assert!(outcome.is_completed());
        assert!(outcome.cache_hit);
        assert!(outcome.duration.is_some());
    }

    #[test]
    fn test_execution_result_aggregation() {
        let mut result = ExecutionResult::new("run_123".to_string(), "Train".to_string());

        result.add_node(NodeOutcome::new("Tokenize", None).completed(true));
        result.add_node(
            NodeOutcome::new("Evaluate", None)
                .failed(ErrorDescriptor::new(FailureKind::Execution, "boom")),
        );
        result.add_node(
            NodeOutcome::new("Train", None)
                .skipped(ErrorDescriptor::new(FailureKind::Upstream, "Evaluate failed")),
        );
        result.mark_completed();

        assert_eq!(result.summary.total_tasks, 3);
        assert_eq!(result.summary.completed_tasks, 1);
        assert_eq!(result.summary.cache_hits, 1);
        assert_eq!(result.summary.executed_tasks, 0);
        assert_eq!(result.summary.failed_tasks, 1);
        assert_eq!(result.summary.skipped_tasks, 1);
        assert_eq!(result.status, ExecutionStatus::PartialSuccess);
        assert_eq!(result.root().unwrap().task_type, "Train");
    }

    #[test]
    fn test_all_completed_is_success() {
        let mut result = ExecutionResult::new("run".to_string(), "A".to_string());
        result.add_node(NodeOutcome::new("A", None).completed(false));
        result.mark_completed();

        assert!(result.is_success());
        assert_eq!(result.summary.success_rate, 100.0);
    }
}
