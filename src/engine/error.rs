// ABOUTME: Error types for graph expansion, context resolution and task execution
// ABOUTME: Wraps discriminator and storage failures so callers see one engine error type

use std::time::Duration;
use thiserror::Error;

use crate::discriminator::DiscriminatorError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] DiscriminatorError),

    #[error("Invalid configuration for task {task_type}: {source}")]
    TaskConfiguration {
        task_type: String,
        #[source]
        source: DiscriminatorError,
    },

    #[error("Cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Task context not found: {context_id}")]
    TaskContextNotFound { context_id: String },

    #[error("Configuration {context_id} of task {task_type} is already running")]
    DuplicateRunningConfiguration {
        task_type: String,
        context_id: String,
    },

    #[error("Timed out after {timeout:?} waiting for context {context_id}")]
    WaitTimeout {
        context_id: String,
        timeout: Duration,
    },

    #[error("Task {task_type} failed: {message}")]
    TaskExecution { task_type: String, message: String },

    #[error("Awaited execution of context {context_id} failed: {message}")]
    ConfiguredExecutionFailed { context_id: String, message: String },

    #[error("Invalid status transition for context {context_id}: {from} -> {to}")]
    InvalidTransition {
        context_id: String,
        from: String,
        to: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl EngineError {
    /// Errors raised while building the graph, before anything touches storage
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            EngineError::Configuration(_)
                | EngineError::TaskConfiguration { .. }
                | EngineError::CyclicDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
