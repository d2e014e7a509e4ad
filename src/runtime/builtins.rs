//! Built-in node implementations.
//!
//! These supply the semantics of the structural and durable node kinds the
//! compiler emits. Structural nodes (start, joins, containers, the subflow
//! container) pass their input through; durable nodes suspend; the loop
//! controller drives iteration; mappers translate context keys at
//! sub-workflow boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::graph::kinds;

use super::condition;
use super::node::{NodeCtx, NodeHandler, NodeResult, UserRegistry};

/// Registry of built-in handlers, keyed by `uses`.
pub fn built_in_registry() -> UserRegistry {
    let pass_through: Arc<dyn NodeHandler> = Arc::new(PassThrough);
    let mut registry: UserRegistry = HashMap::new();
    for uses in [
        kinds::START,
        kinds::SUBFLOW,
        kinds::JOIN,
        kinds::MERGE,
        kinds::GATHER,
        kinds::CONDITIONAL_JOIN,
        kinds::PARALLEL_CONTAINER,
    ] {
        registry.insert(uses.to_string(), Arc::clone(&pass_through));
    }
    registry.insert(kinds::INPUT_MAPPER.to_string(), Arc::new(InputMapper));
    registry.insert(kinds::OUTPUT_MAPPER.to_string(), Arc::new(OutputMapper));
    registry.insert(kinds::SLEEP.to_string(), Arc::new(Sleep));
    registry.insert(kinds::WAIT.to_string(), Arc::new(Wait));
    registry.insert(kinds::WEBHOOK.to_string(), Arc::new(Webhook));
    registry.insert(
        kinds::LOOP_CONTROLLER.to_string(),
        Arc::new(LoopController),
    );
    registry
}

/// start, joins, gather, containers: the output is the input.
struct PassThrough;

#[async_trait]
impl NodeHandler for PassThrough {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        Ok(NodeResult::ok(ctx.input))
    }
}

/// Copies declared keys from the parent scope into the sub-workflow
/// keyspace. `params.inputs` maps child key -> parent key; a missing
/// parent key warns, it does not fail.
struct InputMapper;

#[async_trait]
impl NodeHandler for InputMapper {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        let mapping = ctx.node.params.get("inputs").cloned();
        if let Some(Value::Object(mapping)) = mapping {
            for (child_key, parent_key) in mapping {
                let Some(parent_key) = parent_key.as_str() else {
                    continue;
                };
                match ctx.context.get(parent_key).cloned() {
                    Some(value) => ctx.context.set(child_key, value),
                    None => ctx.deps.logger.warn(
                        &format!(
                            "input mapping for '{}': parent key '{}' is missing",
                            ctx.node.id, parent_key
                        ),
                        None,
                    ),
                }
            }
        }
        Ok(NodeResult::ok(ctx.input))
    }
}

/// Copies declared sub-workflow outputs back into parent keys.
/// `params.outputs` maps parent key -> child key.
struct OutputMapper;

#[async_trait]
impl NodeHandler for OutputMapper {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        let mapping = ctx.node.params.get("outputs").cloned();
        if let Some(Value::Object(mapping)) = mapping {
            for (parent_key, child_key) in mapping {
                let Some(child_key) = child_key.as_str() else {
                    continue;
                };
                match ctx.context.get(child_key).cloned() {
                    Some(value) => ctx.context.set(parent_key, value),
                    None => ctx.deps.logger.warn(
                        &format!(
                            "output mapping for '{}': sub-workflow key '{}' is missing",
                            ctx.node.id, child_key
                        ),
                        None,
                    ),
                }
            }
        }
        Ok(NodeResult::ok(ctx.input))
    }
}

/// Suspends for `params.duration` milliseconds.
struct Sleep;

#[async_trait]
impl NodeHandler for Sleep {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        let millis = match ctx.node.params.get("duration") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(NodeResult::ok(ctx.input))
    }
}

/// Suspends until the signal hub delivers `params.event`.
struct Wait;

#[async_trait]
impl NodeHandler for Wait {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        let Some(event) = ctx.param_str("event").map(str::to_string) else {
            anyhow::bail!("wait node '{}' has no event param", ctx.node.id);
        };
        let payload = ctx.deps.signals.wait_for(&event).await;
        Ok(NodeResult::ok(payload))
    }
}

/// Registers a webhook endpoint. The handle it returns is consumed by a
/// downstream `wait` node parameterized with `webhook:<this node id>`.
struct Webhook;

#[async_trait]
impl NodeHandler for Webhook {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        let path = ctx.param_str("path").unwrap_or("/").to_string();
        Ok(NodeResult::ok(json!({
            "id": ctx.node.id,
            "path": path,
            "event": format!("webhook:{}", ctx.node.id),
        })))
    }
}

/// Drives `while` and `for…of` loops.
///
/// With an `iterable` param it advances a per-execution index kept in the
/// context, publishes the binding, and emits `continue` until the items
/// run out. Without one it re-evaluates `params.condition` each arrival.
struct LoopController;

#[async_trait]
impl NodeHandler for LoopController {
    async fn run(&self, ctx: NodeCtx<'_>) -> anyhow::Result<NodeResult> {
        if let Some(iterable) = ctx.param_str("iterable").map(str::to_string) {
            let index_key = format!("__loop:{}:index", ctx.node.id);
            let index = ctx
                .context
                .get(&index_key)
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;

            let items = condition::evaluate_value(&iterable, ctx.context, &ctx.input)
                .unwrap_or(Value::Null);
            let Some(items) = items.as_array().cloned() else {
                ctx.deps.logger.warn(
                    &format!(
                        "loop '{}': iterable '{}' is not an array",
                        ctx.node.id, iterable
                    ),
                    None,
                );
                ctx.context.remove(&index_key);
                return Ok(NodeResult::with_action(Value::Null, "break"));
            };

            if index < items.len() {
                let item = items[index].clone();
                if let Some(binding) = ctx.param_str("binding").map(str::to_string) {
                    ctx.context.set(binding, item.clone());
                }
                ctx.context.set(index_key, json!(index as u64 + 1));
                return Ok(NodeResult::with_action(item, "continue"));
            }
            ctx.context.remove(&index_key);
            return Ok(NodeResult::with_action(Value::Null, "break"));
        }

        let text = ctx.param_str("condition").unwrap_or("false").to_string();
        let proceed = match condition::evaluate(&text, ctx.context, &ctx.input) {
            Ok(value) => value,
            Err(err) => {
                ctx.deps.logger.warn(
                    &format!("loop '{}': {}", ctx.node.id, err),
                    None,
                );
                false
            }
        };
        if proceed {
            Ok(NodeResult::with_action(ctx.input, "continue"))
        } else {
            Ok(NodeResult::with_action(ctx.input, "break"))
        }
    }
}
