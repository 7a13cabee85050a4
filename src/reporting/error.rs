// ABOUTME: Error types for report execution
// ABOUTME: Report errors are recorded on node outcomes and never change task status

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report {report} failed: {message}")]
    Failed { report: String, message: String },

    #[error("Reports may not write reserved property {property}")]
    ReservedProperty { property: String },

    #[error("Report requires a completed context, found {status}")]
    ContextNotCompleted { status: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ReportError {
    pub fn failed(report: impl Into<String>, message: impl Into<String>) -> Self {
        ReportError::Failed {
            report: report.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
