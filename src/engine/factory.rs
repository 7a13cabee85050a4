// ABOUTME: Resolves task configurations to contexts with at most one live context per fingerprint
// ABOUTME: Owns the in-flight index and storage claims, persists transitions and wakes waiters

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::claim::ClaimRecord;
use super::context::{
    ContextStatus, ErrorDescriptor, TaskConfiguration, TaskContext, CONTEXT_RECORD,
    DISCRIMINATOR_RECORD,
};
use super::error::{EngineError, Result};
use crate::discriminator::{ContextId, DiscriminatorSet};
use crate::storage::{retrieve_object, store_object, StorageError, StorageService};

/// What to do when an equivalent configuration is already executing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingRunningPolicy {
    #[default]
    Wait,
    Reject,
}

impl fmt::Display for ExistingRunningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExistingRunningPolicy::Wait => write!(f, "wait"),
            ExistingRunningPolicy::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvePolicy {
    pub on_existing_running: ExistingRunningPolicy,
    pub wait_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum ContextResolution {
    /// A completed context for this configuration already exists
    Existing(TaskContext),
    /// A fresh Pending context owned by the caller
    Created(TaskContext),
}

impl ContextResolution {
    pub fn context(&self) -> &TaskContext {
        match self {
            ContextResolution::Existing(ctx) | ContextResolution::Created(ctx) => ctx,
        }
    }

    pub fn into_context(self) -> TaskContext {
        match self {
            ContextResolution::Existing(ctx) | ContextResolution::Created(ctx) => ctx,
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, ContextResolution::Existing(_))
    }
}

/// Pause between checks on a configuration owned by another process
const REMOTE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CLAIM_ATTEMPTS: usize = 3;

/// A configuration registered by this factory
struct InFlight {
    status: watch::Sender<ContextStatus>,
    /// Payload of the storage claim, once taken
    claim: Option<Vec<u8>>,
}

enum ClaimAttempt {
    Acquired(Vec<u8>),
    HeldElsewhere,
}

pub struct TaskContextFactory {
    storage: Arc<dyn StorageService>,
    policy: ResolvePolicy,
    owner: String,
    in_flight: Mutex<HashMap<ContextId, InFlight>>,
}

impl fmt::Debug for TaskContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContextFactory")
            .field("policy", &self.policy)
            .field("owner", &self.owner)
            .finish()
    }
}

impl TaskContextFactory {
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self {
            storage,
            policy: ResolvePolicy::default(),
            owner: uuid::Uuid::new_v4().to_string(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn storage(&self) -> Arc<dyn StorageService> {
        Arc::clone(&self.storage)
    }

    /// Resolve a configuration using the factory's own policy
    pub async fn create_context(
        &self,
        configuration: &TaskConfiguration,
        upstream: Vec<ContextId>,
    ) -> Result<ContextResolution> {
        self.resolve(configuration, upstream, self.policy).await
    }

    /// Find the completed context of a configuration or register a new Pending one.
    ///
    /// A configuration is first reserved in this factory's in-flight index and then
    /// claimed in storage, so two calls for the same configuration never both receive
    /// `Created`, whether they come from this process or another one sharing the storage.
    /// Unrelated configurations resolve independently.
    pub async fn resolve(
        &self,
        configuration: &TaskConfiguration,
        upstream: Vec<ContextId>,
        policy: ResolvePolicy,
    ) -> Result<ContextResolution> {
        let id = configuration.context_id()?;
        let deadline = policy.wait_timeout.map(|limit| Instant::now() + limit);
        let mut awaited_elsewhere = false;

        loop {
            if let Some(receiver) = self.subscribe(&id).await {
                if policy.on_existing_running == ExistingRunningPolicy::Reject {
                    return Err(duplicate_running(configuration, &id));
                }

                debug!("Waiting for in-flight context {}", id.short());
                if self.wait_for_terminal(&id, receiver, policy, deadline).await?
                    == ContextStatus::Failed
                {
                    return Err(self.awaited_failure(&id).await);
                }
                continue;
            }

            match self.load_existing(&id).await? {
                Some(existing) if existing.is_completed() => {
                    debug!("Cache hit for {} ({})", configuration.task_type, id.short());
                    return Ok(ContextResolution::Existing(existing));
                }
                Some(existing) if existing.is_failed() && awaited_elsewhere => {
                    return Err(self.awaited_failure(&id).await);
                }
                _ => {}
            }

            if !self.reserve(&id).await {
                continue;
            }

            let claim = match self.claim(&id).await {
                Ok(ClaimAttempt::Acquired(claim)) => claim,
                Ok(ClaimAttempt::HeldElsewhere) => {
                    self.unreserve(&id).await;
                    if policy.on_existing_running == ExistingRunningPolicy::Reject {
                        return Err(duplicate_running(configuration, &id));
                    }

                    debug!("Context {} is owned by another process", id.short());
                    awaited_elsewhere = true;
                    pause_for_remote_owner(&id, policy, deadline).await?;
                    continue;
                }
                Err(e) => {
                    self.unreserve(&id).await;
                    return Err(e);
                }
            };

            match self.register(&id, configuration, upstream.clone(), &claim).await {
                Ok(Some(context)) => return Ok(ContextResolution::Created(context)),
                Ok(None) => {
                    // completed elsewhere between the lookup and the claim
                    self.abandon_claim(&id, &claim).await;
                    continue;
                }
                Err(e) => {
                    self.abandon_claim(&id, &claim).await;
                    return Err(e);
                }
            }
        }
    }

    /// Write the Pending records of a claimed configuration. `None` if it is completed by now.
    async fn register(
        &self,
        id: &ContextId,
        configuration: &TaskConfiguration,
        upstream: Vec<ContextId>,
        claim: &[u8],
    ) -> Result<Option<TaskContext>> {
        match self.load_existing(id).await? {
            Some(existing) if existing.is_completed() => return Ok(None),
            Some(existing) => {
                info!(
                    "Replacing {} context {} of {}",
                    existing.status,
                    id.short(),
                    configuration.task_type
                );
            }
            None => {}
        }

        let context = TaskContext::new(id.clone(), configuration, upstream);
        store_object(
            self.storage.as_ref(),
            id,
            DISCRIMINATOR_RECORD,
            &context.discriminators,
        )
        .await?;
        self.persist(&context).await?;

        if let Some(entry) = self.in_flight.lock().await.get_mut(id) {
            entry.claim = Some(claim.to_vec());
        }

        debug!("Created context {} for {}", id.short(), configuration.task_type);
        Ok(Some(context))
    }

    async fn subscribe(&self, id: &ContextId) -> Option<watch::Receiver<ContextStatus>> {
        self.in_flight
            .lock()
            .await
            .get(id)
            .map(|entry| entry.status.subscribe())
    }

    /// Enter `id` into the in-flight index. False if it is already there.
    async fn reserve(&self, id: &ContextId) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains_key(id) {
            return false;
        }

        let (status, _) = watch::channel(ContextStatus::Pending);
        in_flight.insert(id.clone(), InFlight { status, claim: None });
        true
    }

    /// Drop a reservation; its waiters see the channel close and re-evaluate
    async fn unreserve(&self, id: &ContextId) {
        self.in_flight.lock().await.remove(id);
    }

    async fn abandon_claim(&self, id: &ContextId, claim: &[u8]) {
        if let Err(e) = self.storage.release_claim(id, claim).await {
            warn!("Could not release claim on {}: {}", id.short(), e);
        }
        self.unreserve(id).await;
    }

    /// Take the storage claim, breaking it first when its owner is provably gone
    async fn claim(&self, id: &ContextId) -> Result<ClaimAttempt> {
        let claim = ClaimRecord::for_owner(&self.owner).to_bytes()?;

        for _ in 0..CLAIM_ATTEMPTS {
            if self.storage.try_claim(id, &claim).await? {
                return Ok(ClaimAttempt::Acquired(claim));
            }

            let held = match self.storage.read_claim(id).await? {
                Some(held) => held,
                None => continue,
            };

            let abandoned = match ClaimRecord::from_bytes(&held) {
                // this factory has no live registration for the id, so the claim is left over
                Some(holder) if holder.owner == self.owner => true,
                Some(holder) => holder.is_abandoned().await,
                None => true,
            };
            if !abandoned {
                return Ok(ClaimAttempt::HeldElsewhere);
            }

            warn!("Breaking abandoned claim on context {}", id.short());
            self.storage.release_claim(id, &held).await?;
        }

        Ok(ClaimAttempt::HeldElsewhere)
    }

    async fn wait_for_terminal(
        &self,
        id: &ContextId,
        mut receiver: watch::Receiver<ContextStatus>,
        policy: ResolvePolicy,
        deadline: Option<Instant>,
    ) -> Result<ContextStatus> {
        let wait = async {
            // a closed channel means the owner gave up its reservation without a terminal
            // notification; the caller re-evaluates against storage in that case
            match receiver.wait_for(|status| status.is_terminal()).await {
                Ok(status) => *status,
                Err(_) => ContextStatus::Pending,
            }
        };

        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, wait)
                .await
                .map_err(|_| wait_timeout(id, policy)),
            None => Ok(wait.await),
        }
    }

    async fn awaited_failure(&self, id: &ContextId) -> EngineError {
        let message = match self.load(id).await {
            Ok(context) => context
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "execution failed".to_string()),
            Err(e) => e.to_string(),
        };

        EngineError::ConfiguredExecutionFailed {
            context_id: id.to_string(),
            message,
        }
    }

    pub async fn mark_running(&self, context: &mut TaskContext) -> Result<()> {
        context.mark_running()?;
        self.persist(context).await?;

        if let Some(entry) = self.in_flight.lock().await.get(&context.id) {
            entry.status.send_replace(ContextStatus::Running);
        }
        Ok(())
    }

    pub async fn mark_completed(&self, context: &mut TaskContext) -> Result<()> {
        context.mark_completed()?;
        let persisted = self.persist(context).await;
        self.release(&context.id, ContextStatus::Completed).await;
        persisted
    }

    pub async fn mark_failed(
        &self,
        context: &mut TaskContext,
        error: ErrorDescriptor,
        cancelled: bool,
    ) -> Result<()> {
        context.mark_failed(error, cancelled)?;
        let persisted = self.persist(context).await;
        self.release(&context.id, ContextStatus::Failed).await;
        persisted
    }

    /// Add artifact entries to an existing context record
    pub async fn record_artifacts(
        &self,
        context: &mut TaskContext,
        properties: &[String],
    ) -> Result<()> {
        if properties.is_empty() {
            return Ok(());
        }
        for property in properties {
            context.record_artifact(property);
        }
        self.persist(context).await
    }

    async fn release(&self, id: &ContextId, status: ContextStatus) {
        let entry = self.in_flight.lock().await.remove(id);
        if let Some(entry) = entry {
            if let Some(claim) = &entry.claim {
                if let Err(e) = self.storage.release_claim(id, claim).await {
                    warn!("Could not release claim on {}: {}", id.short(), e);
                }
            }
            entry.status.send_replace(status);
        }
    }

    async fn persist(&self, context: &TaskContext) -> Result<()> {
        store_object(self.storage.as_ref(), &context.id, CONTEXT_RECORD, context).await?;
        Ok(())
    }

    async fn load(&self, id: &ContextId) -> Result<TaskContext> {
        let mut context: TaskContext =
            match retrieve_object(self.storage.as_ref(), id, CONTEXT_RECORD).await {
                Ok(context) => context,
                Err(e) if e.is_not_found() => {
                    return Err(EngineError::TaskContextNotFound {
                        context_id: id.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            };

        context.discriminators =
            match retrieve_object::<DiscriminatorSet>(self.storage.as_ref(), id, DISCRIMINATOR_RECORD)
                .await
            {
                Ok(set) => set,
                Err(StorageError::NotFound { .. }) => DiscriminatorSet::new(),
                Err(e) => return Err(e.into()),
            };

        Ok(context)
    }

    async fn load_existing(&self, id: &ContextId) -> Result<Option<TaskContext>> {
        match self.load(id).await {
            Ok(context) => Ok(Some(context)),
            Err(EngineError::TaskContextNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_context(&self, id: &ContextId) -> Result<TaskContext> {
        self.load(id).await
    }

    pub async fn is_in_flight(&self, id: &ContextId) -> bool {
        self.in_flight.lock().await.contains_key(id)
    }

    /// Remove a context record and every artifact stored under it
    pub async fn destroy_context(&self, context: &TaskContext) -> Result<()> {
        if self.is_in_flight(&context.id).await {
            return Err(EngineError::DuplicateRunningConfiguration {
                task_type: context.task_type.clone(),
                context_id: context.id.to_string(),
            });
        }

        self.storage.delete(&context.id).await?;
        info!("Destroyed context {} ({})", context.id.short(), context.task_type);
        Ok(())
    }

    /// Every stored context, sorted by id. Directories without a context record are skipped.
    pub async fn list_contexts(&self) -> Result<Vec<TaskContext>> {
        let mut contexts = Vec::new();

        for id in self.storage.list_contexts().await? {
            match self.load(&id).await {
                Ok(context) => contexts.push(context),
                Err(EngineError::TaskContextNotFound { .. }) => {
                    warn!("Storage entry {} has no context record", id.short());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(contexts)
    }

    /// Destroy every Failed context. With `dry_run` only report what would be removed.
    pub async fn collect_garbage(&self, dry_run: bool) -> Result<Vec<TaskContext>> {
        let failed: Vec<TaskContext> = self
            .list_contexts()
            .await?
            .into_iter()
            .filter(|c| c.is_failed())
            .collect();

        if !dry_run {
            for context in &failed {
                self.destroy_context(context).await?;
            }
        }

        info!(
            "Garbage collection {} {} failed contexts",
            if dry_run { "found" } else { "removed" },
            failed.len()
        );
        Ok(failed)
    }
}

fn duplicate_running(configuration: &TaskConfiguration, id: &ContextId) -> EngineError {
    EngineError::DuplicateRunningConfiguration {
        task_type: configuration.task_type.clone(),
        context_id: id.to_string(),
    }
}

fn wait_timeout(id: &ContextId, policy: ResolvePolicy) -> EngineError {
    EngineError::WaitTimeout {
        context_id: id.to_string(),
        timeout: policy.wait_timeout.unwrap_or_default(),
    }
}

/// Sleep before re-checking a configuration owned by another process, within the deadline
async fn pause_for_remote_owner(
    id: &ContextId,
    policy: ResolvePolicy,
    deadline: Option<Instant>,
) -> Result<()> {
    let wake = match deadline {
        Some(deadline) if Instant::now() >= deadline => return Err(wait_timeout(id, policy)),
        Some(deadline) => deadline.min(Instant::now() + REMOTE_POLL_INTERVAL),
        None => Instant::now() + REMOTE_POLL_INTERVAL,
    };
    tokio::time::sleep_until(wake).await;
    Ok(())
}
