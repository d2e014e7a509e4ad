//! Runtime: blueprint hydration, scheduling, resiliency, events.

pub mod builtins;
pub mod condition;
pub mod context;
pub mod events;
pub mod executor;
pub mod node;
pub mod signals;

pub use builtins::built_in_registry;
pub use context::{ExecutionContext, ExecutionMetadata};
pub use events::{
    EventBus, Logger, NullEventBus, NullLogger, RecordedEvent, RecordingEventBus,
    TracingEventBus, TracingLogger,
};
pub use executor::{
    BlueprintExecutor, CancelToken, ExecutionReport, ExecutorOptions, NodeExecutionError,
    RunMetadata, RunStatus, WorkflowError,
};
pub use node::{step_fn, Dependencies, NodeCtx, NodeHandler, NodeResult, StepArgs, UserRegistry};
pub use signals::SignalHub;
