// ABOUTME: Task execution engine module for labgraph
// ABOUTME: Handles graph expansion, context resolution, lifecycle coordination and scheduling

pub mod claim;
pub mod context;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod factory;
pub mod invoker;
pub mod lifecycle;
pub mod result;
pub mod scheduler;

pub use claim::ClaimRecord;
pub use context::{
    ContextStatus, ErrorDescriptor, FailureKind, StorageLocation, TaskConfiguration, TaskContext,
};
pub use dependency::{DependencyGraph, ExecutionPlan, TaskNode};
pub use error::{EngineError, Result};
pub use executor::{EngineBuilder, EngineConfig, ExecutionEngine, ExecutorStats};
pub use factory::{ContextResolution, ExistingRunningPolicy, ResolvePolicy, TaskContextFactory};
pub use invoker::{LocalInvoker, TaskInvoker};
pub use lifecycle::{LifecycleConfig, LifecycleListener, LifecycleManager};
pub use result::{ExecutionResult, ExecutionStatus, ExecutionSummary, NodeOutcome, NodeStatus};
pub use scheduler::TaskScheduler;
