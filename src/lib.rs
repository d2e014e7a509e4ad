//! # Flowcraft
//!
//! Durable-workflow compiler and runtime pair.
//!
//! A developer writes ordinary-looking async procedures in a typed source
//! dialect; the compiler statically analyses their control flow and emits
//! **blueprints**, language-agnostic graphs describing every
//! suspend-point, branch, loop, parallel fan-out, and error boundary. The
//! runtime hydrates a blueprint into an executable flow, schedules its
//! nodes with resiliency (retries, timeouts, fallbacks), propagates
//! results through a shared context, and emits lifecycle events.
//!
//! ## Pipeline
//!
//! | Stage | Module | What happens |
//! |-------|--------|--------------|
//! | Parse | [`lang`] | entry files -> token stream -> AST |
//! | Discover | [`analyzer::files`] | `@flow`/`@step` exports, imports, caching |
//! | Lower | [`analyzer::flow`] | one flow body -> nodes + edges |
//! | Flatten | [`builder`] | inline subflows, mappers, containers, maps |
//! | Emit | [`manifest`] | blueprints + registry -> manifest module |
//! | Execute | [`runtime`] | blueprint + registry -> final context |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use flowcraft::compiler::compile_project;
//! use flowcraft::runtime::{step_fn, BlueprintExecutor, NodeResult, UserRegistry};
//!
//! let output = compile_project(&["src/index.ts"], None, None)?;
//! if !output.is_success() {
//!     for diagnostic in output.diagnostics.records() {
//!         eprintln!("{}", diagnostic);
//!     }
//! }
//!
//! let mut registry = UserRegistry::new();
//! registry.insert("chargeCard".into(), step_fn(|args| async move {
//!     Ok(NodeResult::ok(serde_json::json!({"charged": true})))
//! }));
//!
//! let executor = BlueprintExecutor::new();
//! let report = executor.execute(&output.blueprints["main"], &registry).await?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod analyzer;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod lang;
pub mod manifest;
pub mod runtime;

pub use analyzer::{Registry, StepRef};
pub use builder::{BlueprintBuilder, BuilderError, BuilderOptions, SubWorkflowResolver};
pub use compiler::{compile_project, CompileError, CompileOutput};
pub use config::FlowcraftConfig;
pub use diagnostics::{Diagnostic, Diagnostics, Severity, SourceLocation};
pub use error::FlowcraftError;
pub use graph::{
    EdgeDefinition, JoinStrategy, NodeConfig, NodeDefinition, WorkflowBlueprint, WorkflowGraph,
};
pub use runtime::{
    BlueprintExecutor, CancelToken, EventBus, ExecutionContext, ExecutionReport,
    ExecutorOptions, NodeHandler, NodeResult, RunStatus, SignalHub, UserRegistry, WorkflowError,
};
