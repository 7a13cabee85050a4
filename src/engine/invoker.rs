// ABOUTME: Seam between the lifecycle manager and the code that actually runs a task body
// ABOUTME: LocalInvoker runs bodies in-process; remote transports implement the same trait

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

use super::error::{EngineError, Result};
use crate::task::{Task, TaskScope};

#[async_trait]
pub trait TaskInvoker: Send + Sync {
    /// Run the body of `task` against `scope`. Any failure maps to `TaskExecution`.
    async fn invoke(&self, task: Arc<dyn Task>, scope: &TaskScope) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct LocalInvoker;

impl LocalInvoker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskInvoker for LocalInvoker {
    async fn invoke(&self, task: Arc<dyn Task>, scope: &TaskScope) -> Result<()> {
        debug!(
            "Invoking {} in-process for context {}",
            task.task_type(),
            scope.context().id.short()
        );

        match AssertUnwindSafe(task.execute(scope)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EngineError::TaskExecution {
                task_type: task.task_type().to_string(),
                message: format!("{:#}", e),
            }),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task panicked".to_string());
                Err(EngineError::TaskExecution {
                    task_type: task.task_type().to_string(),
                    message: format!("panic: {}", message),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discriminator::DiscriminatorSet;
    use crate::engine::context::{TaskConfiguration, TaskContext};
    use crate::storage::MemoryStorage;
    use crate::task::CancellationSignal;

    struct Fails;

    #[async_trait]
    impl Task for Fails {
        fn task_type(&self) -> &str {
            "Fails"
        }

        async fn execute(&self, _scope: &TaskScope) -> anyhow::Result<()> {
            anyhow::bail!("corpus missing")
        }
    }

    struct Panics;

    #[async_trait]
    impl Task for Panics {
        fn task_type(&self) -> &str {
            "Panics"
        }

        async fn execute(&self, _scope: &TaskScope) -> anyhow::Result<()> {
            panic!("index out of range")
        }
    }

    fn scope(task_type: &str) -> TaskScope {
        let config = TaskConfiguration::new(task_type, DiscriminatorSet::new());
        TaskScope::new(
            TaskContext::new(config.context_id().unwrap(), &config, vec![]),
            vec![],
            Arc::new(MemoryStorage::new()),
            CancellationSignal::never(),
        )
    }

    #[tokio::test]
    async fn test_body_error_becomes_task_execution() {
        let err = LocalInvoker::new()
            .invoke(Arc::new(Fails), &scope("Fails"))
            .await
            .unwrap_err();

        assert!(
            matches!(err, EngineError::TaskExecution { ref message, .. } if message == "corpus missing")
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let err = LocalInvoker::new()
            .invoke(Arc::new(Panics), &scope("Panics"))
            .await
            .unwrap_err();

        assert!(
            matches!(err, EngineError::TaskExecution { ref message, .. } if message.contains("index out of range"))
        );
    }
}
