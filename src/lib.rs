// ABOUTME: Main library module for the labgraph experiment engine
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod discriminator;
pub mod engine;
pub mod output;
pub mod reporting;
pub mod storage;
pub mod task;

// Re-export commonly used types
pub use discriminator::{ContextId, Discriminator, DiscriminatorSet, DiscriminatorValue};
pub use engine::{
    ContextStatus, EngineConfig, EngineError, ExecutionEngine, ExecutionResult, ExecutionStatus,
    ExistingRunningPolicy, LifecycleListener, NodeStatus, TaskContext, TaskContextFactory,
};
pub use output::{OutputFormat, OutputHandler};
pub use reporting::{MetricsCollector, Report, ReportRegistry, ReportScope};
pub use storage::{FileSystemStorage, MemoryStorage, StorageService};
pub use task::{CancellationHandle, CancellationSignal, Task, TaskScope};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
