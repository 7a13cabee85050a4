// ABOUTME: Storage service contract for context-scoped durable artifacts
// ABOUTME: Exports the async storage trait, write policies, and typed helpers

pub mod error;
pub mod filesystem;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;

use crate::discriminator::ContextId;

pub use error::{Result, StorageError};
pub use filesystem::FileSystemStorage;
pub use memory::MemoryStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Each store replaces the previous value
    Overwrite,
    /// Each store adds a new version; retrieve returns the latest
    Append,
}

/// Declares which properties are append-mode. Everything else overwrites.
#[derive(Debug, Clone, Default)]
pub struct StoragePolicy {
    append_properties: HashSet<String>,
}

impl StoragePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_append_property(mut self, property: impl Into<String>) -> Self {
        self.append_properties.insert(property.into());
        self
    }

    pub fn write_mode(&self, property: &str) -> WriteMode {
        if self.append_properties.contains(property) {
            WriteMode::Append
        } else {
            WriteMode::Overwrite
        }
    }
}

/// Durable key/value store addressed by `(context id, property name)`.
///
/// Implementations must never expose a partially written value to readers.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn store(&self, context_id: &ContextId, property: &str, data: &[u8]) -> Result<()>;

    async fn retrieve(&self, context_id: &ContextId, property: &str) -> Result<Vec<u8>>;

    /// All stored versions in write order. Overwrite-mode properties have at most one.
    async fn retrieve_all(&self, context_id: &ContextId, property: &str) -> Result<Vec<Vec<u8>>>;

    async fn exists(&self, context_id: &ContextId, property: &str) -> Result<bool>;

    /// Remove every property stored under a context. Deleting an unknown context is a no-op.
    async fn delete(&self, context_id: &ContextId) -> Result<()>;

    async fn list_contexts(&self) -> Result<Vec<ContextId>>;

    async fn list_properties(&self, context_id: &ContextId) -> Result<Vec<String>>;

    /// Atomically take the exclusive claim on a context. Returns false when a claim is
    /// already held, by this or any other process sharing the storage.
    async fn try_claim(&self, context_id: &ContextId, claim: &[u8]) -> Result<bool>;

    async fn read_claim(&self, context_id: &ContextId) -> Result<Option<Vec<u8>>>;

    /// Drop the claim if it still holds `expected`. Returns whether it was removed.
    async fn release_claim(&self, context_id: &ContextId, expected: &[u8]) -> Result<bool>;

    fn write_mode(&self, property: &str) -> WriteMode;
}

/// Serialize a value as JSON and store it
pub async fn store_object<T>(
    storage: &dyn StorageService,
    context_id: &ContextId,
    property: &str,
    value: &T,
) -> Result<()>
where
    T: Serialize + Sync + ?Sized,
{
    let data = serde_json::to_vec_pretty(value)?;
    storage.store(context_id, property, &data).await
}

/// Retrieve a JSON value and deserialize it
pub async fn retrieve_object<T>(
    storage: &dyn StorageService,
    context_id: &ContextId,
    property: &str,
) -> Result<T>
where
    T: DeserializeOwned,
{
    let data = storage.retrieve(context_id, property).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Check that a property name is usable as a single path component
pub fn validate_property(property: &str) -> Result<()> {
    let reason = if property.is_empty() {
        Some("property name must not be empty")
    } else if property.starts_with('.') {
        Some("property name must not start with '.'")
    } else if property.contains('/') || property.contains('\\') {
        Some("property name must not contain path separators")
    } else if property.chars().any(|c| c.is_control()) {
        Some("property name must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidKey {
            property: property.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_property() {
        assert!(validate_property("model.bin").is_ok());
        assert!(validate_property("").is_err());
        assert!(validate_property(".hidden").is_err());
        assert!(validate_property("a/b").is_err());
        assert!(validate_property("a\\b").is_err());
        assert!(validate_property("..").is_err());
    }

    #[test]
    fn test_policy_write_mode() {
        let policy = StoragePolicy::new().with_append_property("log");
        assert_eq!(policy.write_mode("log"), WriteMode::Append);
        assert_eq!(policy.write_mode("model"), WriteMode::Overwrite);
    }
}
