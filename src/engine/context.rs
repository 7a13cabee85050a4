// ABOUTME: Task configurations and the persistent context record of one configuration
// ABOUTME: Tracks status transitions, artifacts and failure descriptors for a fingerprint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::{EngineError, Result};
use crate::discriminator::{fingerprint, normalize, CanonicalForm, ContextId, DiscriminatorSet};

/// Property holding the serialized [`TaskContext`]
pub const CONTEXT_RECORD: &str = "context.json";
/// Property holding the serialized [`DiscriminatorSet`]
pub const DISCRIMINATOR_RECORD: &str = "discriminators.json";

/// Properties owned by the engine. Task bodies and reports may not write them.
pub fn is_reserved_property(property: &str) -> bool {
    property == CONTEXT_RECORD || property == DISCRIMINATOR_RECORD
}

/// A task type together with its full (own plus inherited) discriminator set
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfiguration {
    pub task_type: String,
    pub discriminators: DiscriminatorSet,
}

impl TaskConfiguration {
    pub fn new(task_type: impl Into<String>, discriminators: DiscriminatorSet) -> Self {
        Self {
            task_type: task_type.into(),
            discriminators,
        }
    }

    pub fn canonical_form(&self) -> Result<CanonicalForm> {
        normalize(&self.discriminators).map_err(|source| EngineError::TaskConfiguration {
            task_type: self.task_type.clone(),
            source,
        })
    }

    pub fn context_id(&self) -> Result<ContextId> {
        Ok(fingerprint(&self.task_type, &self.canonical_form()?))
    }

    /// Equal task type and equal discriminating values, regardless of informational entries
    pub fn is_equivalent(&self, other: &TaskConfiguration) -> bool {
        match (self.context_id(), other.context_id()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ContextStatus {
    /// Pending -> Running -> {Completed | Failed}. A Pending context may also fail
    /// before its body starts (timeout, cancellation, storage trouble).
    pub fn can_transition_to(self, next: ContextStatus) -> bool {
        matches!(
            (self, next),
            (ContextStatus::Pending, ContextStatus::Running)
                | (ContextStatus::Pending, ContextStatus::Failed)
                | (ContextStatus::Running, ContextStatus::Completed)
                | (ContextStatus::Running, ContextStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ContextStatus::Completed | ContextStatus::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, ContextStatus::Pending | ContextStatus::Running)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pending" => Some(ContextStatus::Pending),
            "running" => Some(ContextStatus::Running),
            "completed" => Some(ContextStatus::Completed),
            "failed" => Some(ContextStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextStatus::Pending => write!(f, "pending"),
            ContextStatus::Running => write!(f, "running"),
            ContextStatus::Completed => write!(f, "completed"),
            ContextStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub context_id: ContextId,
    pub property: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The task body returned an error
    Execution,
    Timeout,
    Cancelled,
    Storage,
    /// Another submission owned the configuration and failed, or was rejected
    Coordination,
    /// An upstream node did not complete
    Upstream,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Storage => "storage",
            FailureKind::Coordination => "coordination",
            FailureKind::Upstream => "upstream",
            FailureKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: FailureKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&EngineError> for ErrorDescriptor {
    fn from(error: &EngineError) -> Self {
        let kind = match error {
            EngineError::Storage(_) => FailureKind::Storage,
            EngineError::TaskExecution { .. } => FailureKind::Execution,
            EngineError::WaitTimeout { .. }
            | EngineError::DuplicateRunningConfiguration { .. }
            | EngineError::ConfiguredExecutionFailed { .. } => FailureKind::Coordination,
            _ => FailureKind::Internal,
        };
        ErrorDescriptor::new(kind, error.to_string())
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Persistent record of one configuration. The discriminator set is stored in its own
/// record next to this one and re-attached on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub id: ContextId,
    pub task_type: String,
    #[serde(skip)]
    pub discriminators: DiscriminatorSet,
    #[serde(default)]
    pub upstream: Vec<ContextId>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, StorageLocation>,
    pub status: ContextStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled: bool,
}

impl TaskContext {
    pub fn new(id: ContextId, configuration: &TaskConfiguration, upstream: Vec<ContextId>) -> Self {
        Self {
            id,
            task_type: configuration.task_type.clone(),
            discriminators: configuration.discriminators.clone(),
            upstream,
            artifacts: BTreeMap::new(),
            status: ContextStatus::Pending,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancelled: false,
        }
    }

    pub fn configuration(&self) -> TaskConfiguration {
        TaskConfiguration::new(self.task_type.clone(), self.discriminators.clone())
    }

    pub fn is_completed(&self) -> bool {
        self.status == ContextStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ContextStatus::Failed
    }

    pub fn artifact(&self, name: &str) -> Option<&StorageLocation> {
        self.artifacts.get(name)
    }

    pub fn record_artifact(&mut self, property: &str) {
        self.artifacts.insert(
            property.to_string(),
            StorageLocation {
                context_id: self.id.clone(),
                property: property.to_string(),
            },
        );
    }

    pub fn duration(&self) -> Option<std::time::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    fn transition(&mut self, next: ContextStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                context_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(ContextStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.transition(ContextStatus::Completed)?;
        self.finished_at = Some(Utc::now());
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: ErrorDescriptor, cancelled: bool) -> Result<()> {
        self.transition(ContextStatus::Failed)?;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
        self.cancelled = cancelled;
        Ok(())
    }
}
