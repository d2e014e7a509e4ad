//! Node implementation contract and the handle nodes execute against.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::graph::NodeDefinition;

use super::context::{ExecutionContext, ExecutionMetadata};
use super::events::{EventBus, Logger, NullEventBus, NullLogger};
use super::signals::SignalHub;

/// Ambient collaborators injected into every node.
#[derive(Clone)]
pub struct Dependencies {
    pub event_bus: Arc<dyn EventBus>,
    pub logger: Arc<dyn Logger>,
    pub signals: SignalHub,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self {
            event_bus: Arc::new(NullEventBus),
            logger: Arc::new(NullLogger),
            signals: SignalHub::new(),
        }
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies").finish_non_exhaustive()
    }
}

/// What a node produces: an output value that becomes the successor's
/// input, and an optional action that selects among outgoing edges.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeResult {
    pub output: Value,
    pub action: Option<String>,
}

impl NodeResult {
    pub fn ok(output: Value) -> Self {
        Self {
            output,
            action: None,
        }
    }

    pub fn with_action(output: Value, action: impl Into<String>) -> Self {
        Self {
            output,
            action: Some(action.into()),
        }
    }
}

/// Handle passed to a node for the duration of one attempt.
pub struct NodeCtx<'a> {
    /// Shared mutable context; writes are visible to successors.
    pub context: &'a mut ExecutionContext,
    /// The previous node's output (executor-injected).
    pub input: Value,
    pub node: &'a NodeDefinition,
    pub deps: &'a Dependencies,
    pub metadata: &'a ExecutionMetadata,
}

impl<'a> NodeCtx<'a> {
    pub fn params(&self) -> &Map<String, Value> {
        &self.node.params
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.node.param_str(key)
    }
}

/// One node implementation. Implementations are stateless and looked up by
/// string key; per-node configuration arrives through the handle.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult>;
}

/// Run-time registry of user step implementations, keyed by step name.
pub type UserRegistry = HashMap<String, Arc<dyn NodeHandler>>;

/// Wrap an async closure as a step implementation.
///
/// ```rust,ignore
/// let mut registry = UserRegistry::new();
/// registry.insert("chargeCard".into(), step_fn(|ctx| async move {
///     Ok(NodeResult::ok(json!({"charged": true})))
/// }));
/// ```
pub fn step_fn<F, Fut>(f: F) -> Arc<dyn NodeHandler>
where
    F: Fn(StepArgs) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<NodeResult>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Owned snapshot handed to `step_fn` closures. Closures cannot borrow the
/// live context across an await, so they receive the input and params by
/// value and publish context writes through the returned result.
#[derive(Debug, Clone)]
pub struct StepArgs {
    pub input: Value,
    pub params: Map<String, Value>,
    pub node_id: String,
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> NodeHandler for FnHandler<F>
where
    F: Fn(StepArgs) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<NodeResult>> + Send,
{
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        let args = StepArgs {
            input: ctx.input.clone(),
            params: ctx.node.params.clone(),
            node_id: ctx.node.id.clone(),
        };
        (self.f)(args).await
    }
}
