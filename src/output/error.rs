// ABOUTME: Error types for output rendering
// ABOUTME: Covers unknown formats and serialization failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Formatter not found: {format}")]
    FormatterNotFound { format: String },

    #[error("Format error: {message}")]
    FormatError { message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    YamlSerializationError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OutputError>;
