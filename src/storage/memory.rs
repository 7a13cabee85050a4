// ABOUTME: In-process storage backend kept behind an async read/write lock
// ABOUTME: Used for ephemeral runs and tests; contents vanish with the process

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::{Result, StorageError};
use super::{validate_property, StoragePolicy, StorageService, WriteMode};
use crate::discriminator::ContextId;

type PropertyVersions = HashMap<String, Vec<Vec<u8>>>;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    contexts: RwLock<HashMap<ContextId, PropertyVersions>>,
    claims: RwLock<HashMap<ContextId, Vec<u8>>>,
    policy: StoragePolicy,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: StoragePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    fn not_found(context_id: &ContextId, property: &str) -> StorageError {
        StorageError::NotFound {
            context_id: context_id.to_string(),
            property: property.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn store(&self, context_id: &ContextId, property: &str, data: &[u8]) -> Result<()> {
        validate_property(property)?;

        let mut contexts = self.contexts.write().await;
        let versions = contexts
            .entry(context_id.clone())
            .or_default()
            .entry(property.to_string())
            .or_default();

        match self.policy.write_mode(property) {
            WriteMode::Overwrite => {
                versions.clear();
                versions.push(data.to_vec());
            }
            WriteMode::Append => versions.push(data.to_vec()),
        }

        Ok(())
    }

    async fn retrieve(&self, context_id: &ContextId, property: &str) -> Result<Vec<u8>> {
        validate_property(property)?;

        let contexts = self.contexts.read().await;
        contexts
            .get(context_id)
            .and_then(|props| props.get(property))
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| Self::not_found(context_id, property))
    }

    async fn retrieve_all(&self, context_id: &ContextId, property: &str) -> Result<Vec<Vec<u8>>> {
        validate_property(property)?;

        let contexts = self.contexts.read().await;
        contexts
            .get(context_id)
            .and_then(|props| props.get(property))
            .cloned()
            .ok_or_else(|| Self::not_found(context_id, property))
    }

    async fn exists(&self, context_id: &ContextId, property: &str) -> Result<bool> {
        validate_property(property)?;

        let contexts = self.contexts.read().await;
        Ok(contexts
            .get(context_id)
            .map(|props| props.contains_key(property))
            .unwrap_or(false))
    }

    async fn delete(&self, context_id: &ContextId) -> Result<()> {
        self.contexts.write().await.remove(context_id);
        self.claims.write().await.remove(context_id);
        Ok(())
    }

    async fn list_contexts(&self) -> Result<Vec<ContextId>> {
        let contexts = self.contexts.read().await;
        let mut ids: Vec<ContextId> = contexts.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_properties(&self, context_id: &ContextId) -> Result<Vec<String>> {
        let contexts = self.contexts.read().await;
        let mut properties: Vec<String> = contexts
            .get(context_id)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        properties.sort();
        Ok(properties)
    }

    async fn try_claim(&self, context_id: &ContextId, claim: &[u8]) -> Result<bool> {
        let mut claims = self.claims.write().await;
        if claims.contains_key(context_id) {
            return Ok(false);
        }
        claims.insert(context_id.clone(), claim.to_vec());
        Ok(true)
    }

    async fn read_claim(&self, context_id: &ContextId) -> Result<Option<Vec<u8>>> {
        Ok(self.claims.read().await.get(context_id).cloned())
    }

    async fn release_claim(&self, context_id: &ContextId, expected: &[u8]) -> Result<bool> {
        let mut claims = self.claims.write().await;
        if claims.get(context_id).map(Vec::as_slice) == Some(expected) {
            claims.remove(context_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn write_mode(&self, property: &str) -> WriteMode {
        self.policy.write_mode(property)
    }
}
