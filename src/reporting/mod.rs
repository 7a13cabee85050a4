// ABOUTME: Reports run against completed contexts and the registry that selects them
// ABOUTME: Reports read artifacts and may write derived ones, but never touch status or discriminators

pub mod error;
pub mod metrics;
pub mod summary;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::context::{is_reserved_property, TaskContext};
use crate::storage::StorageService;

pub use self::error::{ReportError, Result};
pub use self::metrics::{ExecutionMetrics, MetricsCollector, TaskTypeMetrics};
pub use self::summary::SummaryReport;

#[async_trait]
pub trait Report: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, scope: &ReportScope) -> Result<()>;
}

/// Read access to a completed context plus a write path for derived artifacts
pub struct ReportScope {
    context: TaskContext,
    storage: Arc<dyn StorageService>,
    written: Mutex<Vec<String>>,
}

impl ReportScope {
    pub fn new(context: TaskContext, storage: Arc<dyn StorageService>) -> Self {
        Self {
            context,
            storage,
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub async fn retrieve_artifact(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.storage.retrieve(&self.context.id, name).await?)
    }

    pub async fn store_artifact(&self, name: &str, data: &[u8]) -> Result<()> {
        if is_reserved_property(name) {
            return Err(ReportError::ReservedProperty {
                property: name.to_string(),
            });
        }

        self.storage.store(&self.context.id, name, data).await?;

        let mut written = self.written.lock().await;
        if !written.iter().any(|w| w == name) {
            written.push(name.to_string());
        }
        Ok(())
    }

    pub async fn store_artifact_object<T>(&self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store_artifact(name, &data).await
    }

    pub async fn written_artifacts(&self) -> Vec<String> {
        self.written.lock().await.clone()
    }
}

/// Outcome of running every report that applies to one context
#[derive(Debug, Clone, Default)]
pub struct ReportRun {
    pub errors: Vec<String>,
    pub artifacts: Vec<String>,
}

/// Reports keyed by task type, plus reports that apply to every task
#[derive(Default, Clone)]
pub struct ReportRegistry {
    by_task_type: HashMap<String, Vec<Arc<dyn Report>>>,
    global: Vec<Arc<dyn Report>>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: &str, report: Arc<dyn Report>) {
        self.by_task_type
            .entry(task_type.to_string())
            .or_default()
            .push(report);
    }

    pub fn register_global(&mut self, report: Arc<dyn Report>) {
        self.global.push(report);
    }

    /// Type-specific reports first, then global ones, each in registration order
    pub fn reports_for(&self, task_type: &str) -> Vec<Arc<dyn Report>> {
        self.by_task_type
            .get(task_type)
            .into_iter()
            .flatten()
            .chain(self.global.iter())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_task_type.values().all(|r| r.is_empty())
    }

    /// Run the applicable reports in order. A failing report is logged and the rest still run.
    pub async fn run(&self, context: &TaskContext, storage: Arc<dyn StorageService>) -> ReportRun {
        let reports = self.reports_for(&context.task_type);
        let mut run = ReportRun::default();
        if reports.is_empty() {
            return run;
        }

        if !context.is_completed() {
            run.errors.push(
                ReportError::ContextNotCompleted {
                    status: context.status.to_string(),
                }
                .to_string(),
            );
            return run;
        }

        let scope = ReportScope::new(context.clone(), storage);
        for report in reports {
            debug!("Running report {} for {}", report.name(), context.id.short());
            if let Err(e) = report.execute(&scope).await {
                warn!(
                    "Report {} failed for {} ({}): {}",
                    report.name(),
                    context.task_type,
                    context.id.short(),
                    e
                );
                run.errors.push(format!("{}: {}", report.name(), e));
            }
        }

        run.artifacts = scope.written_artifacts().await;
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discriminator::DiscriminatorSet;
    use crate::engine::context::{TaskConfiguration, CONTEXT_RECORD};
    use crate::storage::MemoryStorage;

    struct Failing;

    #[async_trait]
    impl Report for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _scope: &ReportScope) -> Result<()> {
            Err(ReportError::failed("failing", "no data"))
        }
    }

    struct Writes(&'static str);

    #[async_trait]
    impl Report for Writes {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, scope: &ReportScope) -> Result<()> {
            scope.store_artifact(self.0, b"derived").await
        }
    }

    fn completed_context(task_type: &str) -> TaskContext {
        let config = TaskConfiguration::new(task_type, DiscriminatorSet::new());
        let mut context = TaskContext::new(config.context_id().unwrap(), &config, vec![]);
        context.mark_running().unwrap();
        context.mark_completed().unwrap();
        context
    }

    #[test]
    fn test_reports_for_orders_typed_before_global() {
        let mut registry = ReportRegistry::new();
        registry.register_global(Arc::new(Writes("global")));
        registry.register("Train", Arc::new(Writes("typed")));

        let names: Vec<String> = registry
            .reports_for("Train")
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["typed", "global"]);
        assert_eq!(registry.reports_for("Tokenize").len(), 1);
    }

    #[tokio::test]
    async fn test_failing_report_does_not_stop_others() {
        let mut registry = ReportRegistry::new();
        registry.register("Train", Arc::new(Failing));
        registry.register("Train", Arc::new(Writes("plot")));

        let storage: Arc<dyn StorageService> = Arc::new(MemoryStorage::new());
        let context = completed_context("Train");
        let run = registry.run(&context, Arc::clone(&storage)).await;

        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.artifacts, vec!["plot".to_string()]);
        assert!(storage.exists(&context.id, "plot").await.unwrap());
    }

    #[tokio::test]
    async fn test_reserved_property_refused() {
        let scope = ReportScope::new(completed_context("Train"), Arc::new(MemoryStorage::new()));
        let err = scope.store_artifact(CONTEXT_RECORD, b"{}").await.unwrap_err();
        assert!(matches!(err, ReportError::ReservedProperty { .. }));
    }
}
