// ABOUTME: Execution scope handed to a task body
// ABOUTME: Exposes the context, upstream contexts, artifact storage and the cancellation signal

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::cancel::CancellationSignal;
use crate::discriminator::{DiscriminatorSet, DiscriminatorValue};
use crate::engine::context::{is_reserved_property, TaskContext};
use crate::storage::{self, StorageError, StorageService};

pub struct TaskScope {
    context: TaskContext,
    upstream: Vec<TaskContext>,
    storage: Arc<dyn StorageService>,
    cancellation: CancellationSignal,
    written: Mutex<Vec<String>>,
}

impl TaskScope {
    pub fn new(
        context: TaskContext,
        upstream: Vec<TaskContext>,
        storage: Arc<dyn StorageService>,
        cancellation: CancellationSignal,
    ) -> Self {
        Self {
            context,
            upstream,
            storage,
            cancellation,
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn discriminators(&self) -> &DiscriminatorSet {
        &self.context.discriminators
    }

    pub fn discriminator(&self, key: &str) -> Option<&DiscriminatorValue> {
        self.context.discriminators.get(key)
    }

    /// Completed contexts of the declared dependencies, in declaration order
    pub fn upstream(&self) -> &[TaskContext] {
        &self.upstream
    }

    pub fn upstream_of_type(&self, task_type: &str) -> Option<&TaskContext> {
        self.upstream.iter().find(|c| c.task_type == task_type)
    }

    pub fn storage(&self) -> &dyn StorageService {
        self.storage.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Write an output artifact of this task. Engine record names are refused.
    pub async fn store_artifact(&self, name: &str, data: &[u8]) -> storage::Result<()> {
        if is_reserved_property(name) {
            return Err(StorageError::InvalidKey {
                property: name.to_string(),
                reason: "reserved for the context record".to_string(),
            });
        }

        self.storage.store(&self.context.id, name, data).await?;

        let mut written = self.written.lock().await;
        if !written.iter().any(|w| w == name) {
            written.push(name.to_string());
        }
        Ok(())
    }

    pub async fn store_artifact_object<T>(&self, name: &str, value: &T) -> storage::Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store_artifact(name, &data).await
    }

    /// Read an artifact this task already wrote
    pub async fn retrieve_artifact(&self, name: &str) -> storage::Result<Vec<u8>> {
        self.storage.retrieve(&self.context.id, name).await
    }

    /// Read an artifact of an upstream context
    pub async fn retrieve_upstream(
        &self,
        upstream: &TaskContext,
        name: &str,
    ) -> storage::Result<Vec<u8>> {
        self.storage.retrieve(&upstream.id, name).await
    }

    pub async fn retrieve_upstream_object<T>(
        &self,
        upstream: &TaskContext,
        name: &str,
    ) -> storage::Result<T>
    where
        T: DeserializeOwned,
    {
        storage::retrieve_object(self.storage.as_ref(), &upstream.id, name).await
    }

    /// Names of the artifacts written through this scope, in first-write order
    pub async fn written_artifacts(&self) -> Vec<String> {
        self.written.lock().await.clone()
    }
}
