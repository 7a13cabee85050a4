// ABOUTME: Error types for the content-addressed storage service
// ABOUTME: Distinguishes missing artifacts from invalid keys and I/O failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Property '{property}' not found for context {context_id}")]
    NotFound {
        context_id: String,
        property: String,
    },

    #[error("Invalid property name '{property}': {reason}")]
    InvalidKey { property: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
