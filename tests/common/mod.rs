// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides configurable test tasks, listeners and isolated storage roots

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use labgraph::discriminator::{DiscriminatorError, DiscriminatorSet, DiscriminatorValue};
use labgraph::engine::{
    EngineConfig, ErrorDescriptor, ExecutionEngine, LifecycleListener, NodeOutcome, TaskContext,
};
use labgraph::storage::{FileSystemStorage, MemoryStorage, StorageService};
use labgraph::task::{Task, TaskScope};

pub const OUTPUT_ARTIFACT: &str = "output";

#[derive(Clone)]
pub enum Behavior {
    /// Write the output artifact and succeed
    Succeed,
    /// Return an error on every run
    Fail(String),
    /// Fail on the first run only
    FailOnce(String),
    /// Sleep, then write the output artifact
    Sleep(Duration),
    /// Sleep, then fail
    SleepThenFail(Duration, String),
    /// Block until cancelled, then fail
    UntilCancelled,
    /// Block until the gate is released
    Gate(Arc<Notify>),
    Panic,
}

/// A configurable task used across the integration tests
pub struct TestTask {
    task_type: String,
    discriminators: Vec<(String, DiscriminatorValue, bool)>,
    dependencies: Vec<Arc<dyn Task>>,
    behavior: Behavior,
    timeout: Option<Duration>,
    runs: Arc<AtomicUsize>,
    started: Arc<Notify>,
}

impl TestTask {
    pub fn new(task_type: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            discriminators: Vec::new(),
            dependencies: Vec::new(),
            behavior: Behavior::Succeed,
            timeout: None,
            runs: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(Notify::new()),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<DiscriminatorValue>) -> Self {
        self.discriminators
            .push((key.to_string(), value.into(), true));
        self
    }

    pub fn with_informational(mut self, key: &str, value: impl Into<DiscriminatorValue>) -> Self {
        self.discriminators
            .push((key.to_string(), value.into(), false));
        self
    }

    pub fn depends_on(mut self, dependency: Arc<dyn Task>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share a run counter between equivalent instances
    pub fn counting(mut self, runs: Arc<AtomicUsize>) -> Self {
        self.runs = runs;
        self
    }

    pub fn build(self) -> Arc<TestTask> {
        Arc::new(self)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Resolves once the body has started
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }
}

#[async_trait]
impl Task for TestTask {
    fn task_type(&self) -> &str {
        &self.task_type
    }

    fn discriminators(&self) -> Result<DiscriminatorSet, DiscriminatorError> {
        let mut set = DiscriminatorSet::new();
        for (key, value, discriminating) in &self.discriminators {
            set = if *discriminating {
                set.with(key.as_str(), value.clone())?
            } else {
                set.with_informational(key.as_str(), value.clone())?
            };
        }
        Ok(set)
    }

    fn dependencies(&self) -> Vec<Arc<dyn Task>> {
        self.dependencies.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, scope: &TaskScope) -> anyhow::Result<()> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.notify_one();

        // every upstream output must be readable before this body does anything
        for upstream in scope.upstream() {
            scope.retrieve_upstream(upstream, OUTPUT_ARTIFACT).await?;
        }

        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail(message) => anyhow::bail!("{}", message),
            Behavior::FailOnce(message) => {
                if run == 1 {
                    anyhow::bail!("{}", message);
                }
            }
            Behavior::Sleep(duration) => tokio::time::sleep(*duration).await,
            Behavior::SleepThenFail(duration, message) => {
                tokio::time::sleep(*duration).await;
                anyhow::bail!("{}", message);
            }
            Behavior::UntilCancelled => {
                scope.cancelled().await;
                anyhow::bail!("interrupted");
            }
            Behavior::Gate(gate) => gate.notified().await,
            Behavior::Panic => panic!("task body panicked"),
        }

        let rendered = format!("{}:{:?}", self.task_type, scope.discriminators().to_string_map());
        scope
            .store_artifact(OUTPUT_ARTIFACT, rendered.as_bytes())
            .await?;
        Ok(())
    }
}

/// Records every lifecycle callback as "event:task_type"
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: &str, task_type: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", event, task_type));
    }
}

#[async_trait]
impl LifecycleListener for RecordingListener {
    async fn before_execution(&self, context: &TaskContext) -> anyhow::Result<()> {
        self.record("before", &context.task_type);
        Ok(())
    }

    async fn after_execution(
        &self,
        context: &TaskContext,
        outcome: &NodeOutcome,
    ) -> anyhow::Result<()> {
        self.record(&format!("after_{}", outcome.status), &context.task_type);
        Ok(())
    }

    async fn on_cache_hit(&self, context: &TaskContext) -> anyhow::Result<()> {
        self.record("cache_hit", &context.task_type);
        Ok(())
    }

    async fn on_skipped(&self, task_type: &str, _reason: &ErrorDescriptor) -> anyhow::Result<()> {
        self.record("skipped", task_type);
        Ok(())
    }
}

pub fn memory_storage() -> Arc<dyn StorageService> {
    Arc::new(MemoryStorage::new())
}

pub async fn filesystem_storage(dir: &TempDir) -> Arc<dyn StorageService> {
    Arc::new(
        FileSystemStorage::open(dir.path().join("store"))
            .await
            .unwrap(),
    )
}

pub fn engine(storage: Arc<dyn StorageService>) -> ExecutionEngine {
    ExecutionEngine::new(EngineConfig::default(), storage)
}

pub fn engine_with(config: EngineConfig, storage: Arc<dyn StorageService>) -> ExecutionEngine {
    ExecutionEngine::new(config, storage)
}
