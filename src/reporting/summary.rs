// ABOUTME: Built-in report that writes a JSON summary of a completed context
// ABOUTME: Records task type, discriminators, artifacts and timing next to the outputs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::Result;
use super::{Report, ReportScope};

pub const SUMMARY_PROPERTY: &str = "summary.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub context_id: String,
    pub task_type: String,
    pub discriminators: BTreeMap<String, String>,
    pub upstream: Vec<String>,
    pub artifacts: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u128>,
}

#[derive(Debug, Clone)]
pub struct SummaryReport {
    property: String,
}

impl SummaryReport {
    pub fn new() -> Self {
        Self {
            property: SUMMARY_PROPERTY.to_string(),
        }
    }

    pub fn with_property(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
        }
    }
}

impl Default for SummaryReport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Report for SummaryReport {
    fn name(&self) -> &str {
        "summary"
    }

    async fn execute(&self, scope: &ReportScope) -> Result<()> {
        let context = scope.context();

        let summary = ContextSummary {
            context_id: context.id.to_string(),
            task_type: context.task_type.clone(),
            discriminators: context.discriminators.to_string_map(),
            upstream: context.upstream.iter().map(|id| id.to_string()).collect(),
            artifacts: context.artifacts.keys().cloned().collect(),
            started_at: context.started_at,
            finished_at: context.finished_at,
            duration_ms: context.duration().map(|d| d.as_millis()),
        };

        scope.store_artifact_object(&self.property, &summary).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discriminator::DiscriminatorSet;
    use crate::engine::context::{TaskConfiguration, TaskContext};
    use crate::storage::{retrieve_object, MemoryStorage, StorageService};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_summary_written() {
        let config = TaskConfiguration::new(
            "Train",
            DiscriminatorSet::new().with("algo", "svm").unwrap(),
        );
        let mut context = TaskContext::new(config.context_id().unwrap(), &config, vec![]);
        context.mark_running().unwrap();
        context.record_artifact("model");
        context.mark_completed().unwrap();

        let storage: Arc<dyn StorageService> = Arc::new(MemoryStorage::new());
        let scope = ReportScope::new(context.clone(), Arc::clone(&storage));
        SummaryReport::new().execute(&scope).await.unwrap();

        let summary: ContextSummary =
            retrieve_object(storage.as_ref(), &context.id, SUMMARY_PROPERTY)
                .await
                .unwrap();
        assert_eq!(summary.task_type, "Train");
        assert_eq!(summary.discriminators["algo"], "svm");
        assert_eq!(summary.artifacts, vec!["model".to_string()]);
    }
}
