// ABOUTME: Contract implemented by user-defined task bodies
// ABOUTME: A task declares its type, discriminators and dependencies, and executes against a scope

pub mod cancel;
pub mod scope;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::discriminator::{DiscriminatorError, DiscriminatorSet};

pub use cancel::{CancellationHandle, CancellationSignal};
pub use scope::TaskScope;

#[async_trait]
pub trait Task: Send + Sync {
    /// Identifier of the kind of work; part of every fingerprint
    fn task_type(&self) -> &str;

    /// The task's own discriminators. Upstream discriminators are inherited by the engine.
    fn discriminators(&self) -> Result<DiscriminatorSet, DiscriminatorError> {
        Ok(DiscriminatorSet::new())
    }

    fn dependencies(&self) -> Vec<Arc<dyn Task>> {
        Vec::new()
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, scope: &TaskScope) -> anyhow::Result<()>;
}
