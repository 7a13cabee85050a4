// ABOUTME: Error types for discriminator validation and canonical encoding
// ABOUTME: Covers the configuration error family raised before any task executes

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscriminatorError {
    #[error("Discriminator value for '{key}' is not serializable: {reason}")]
    ValueNotSerializable { key: String, reason: String },

    #[error("Duplicate discriminator key: {key}")]
    DuplicateKey { key: String },

    #[error("Conflicting inherited discriminator '{key}': declared {existing}, inherited {inherited}")]
    ConflictingInheritance {
        key: String,
        existing: String,
        inherited: String,
    },

    #[error("Invalid discriminator key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid context id: {value}")]
    InvalidContextId { value: String },
}

pub type Result<T> = std::result::Result<T, DiscriminatorError>;
