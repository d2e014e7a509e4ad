//! Event-bus and logger contracts, with null/recording/tracing impls.
//!
//! The executor emits lifecycle events through a single `emit` method;
//! implementations may be fire-and-forget. Payloads are JSON objects keyed
//! on `executionId`. Null implementations are acceptable for both
//! contracts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Lifecycle event names, fixed by the executor contract.
pub mod names {
    pub const WORKFLOW_START: &str = "workflow:start";
    pub const WORKFLOW_FINISH: &str = "workflow:finish";
    pub const NODE_START: &str = "node:start";
    pub const NODE_FINISH: &str = "node:finish";
    pub const NODE_RETRY: &str = "node:retry";
    pub const NODE_FALLBACK: &str = "node:fallback";
    pub const NODE_ERROR: &str = "node:error";
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn emit(&self, event: &str, payload: Value);
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn emit(&self, _event: &str, _payload: Value) {}
}

/// One captured event.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Monotonic sequence id, for ordering assertions.
    pub id: u64,
    pub name: String,
    pub payload: Value,
}

/// Thread-safe, append-only event capture. Useful in tests and for
/// embedders that want to inspect a run after the fact.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventBus {
    events: Arc<RwLock<Vec<RecordedEvent>>>,
    next_id: Arc<AtomicU64>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Events whose payload carries the given execution id.
    pub fn for_execution(&self, execution_id: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| {
                e.payload.get("executionId").and_then(Value::as_str) == Some(execution_id)
            })
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.read().iter().filter(|e| e.name == name).count()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn emit(&self, event: &str, payload: Value) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.events.write().push(RecordedEvent {
            id,
            name: event.to_string(),
            payload,
        });
    }
}

/// Forwards lifecycle events to `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingEventBus;

#[async_trait]
impl EventBus for TracingEventBus {
    async fn emit(&self, event: &str, payload: Value) {
        debug!(event, %payload, "workflow event");
    }
}

// ----------------------------------------------------------------------
// Logger contract
// ----------------------------------------------------------------------

/// Four-method logger contract. A null implementation is acceptable.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str, context: Option<&Value>);
    fn info(&self, message: &str, context: Option<&Value>);
    fn warn(&self, message: &str, context: Option<&Value>);
    fn error(&self, message: &str, context: Option<&Value>);
}

#[derive(Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _message: &str, _context: Option<&Value>) {}
    fn info(&self, _message: &str, _context: Option<&Value>) {}
    fn warn(&self, _message: &str, _context: Option<&Value>) {}
    fn error(&self, _message: &str, _context: Option<&Value>) {}
}

/// Routes the logger contract onto `tracing`.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str, context: Option<&Value>) {
        match context {
            Some(context) => tracing::debug!(%context, "{}", message),
            None => tracing::debug!("{}", message),
        }
    }

    fn info(&self, message: &str, context: Option<&Value>) {
        match context {
            Some(context) => tracing::info!(%context, "{}", message),
            None => tracing::info!("{}", message),
        }
    }

    fn warn(&self, message: &str, context: Option<&Value>) {
        match context {
            Some(context) => tracing::warn!(%context, "{}", message),
            None => tracing::warn!("{}", message),
        }
    }

    fn error(&self, message: &str, context: Option<&Value>) {
        match context {
            Some(context) => tracing::error!(%context, "{}", message),
            None => tracing::error!("{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn recording_bus_keeps_order_and_ids() {
        let bus = RecordingEventBus::new();
        bus.emit(names::WORKFLOW_START, json!({"executionId": "e1"}))
            .await;
        bus.emit(names::NODE_START, json!({"executionId": "e1", "nodeId": "a"}))
            .await;

        let events = bus.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, 0);
        assert_eq!(events[1].id, 1);
        assert_eq!(events[0].name, "workflow:start");
    }

    #[tokio::test]
    async fn recording_bus_filters_by_execution() {
        let bus = RecordingEventBus::new();
        bus.emit(names::NODE_START, json!({"executionId": "e1"}))
            .await;
        bus.emit(names::NODE_START, json!({"executionId": "e2"}))
            .await;

        assert_eq!(bus.for_execution("e1").len(), 1);
        assert_eq!(bus.count(names::NODE_START), 2);
    }

    #[tokio::test]
    async fn recording_bus_clones_share_storage() {
        let bus = RecordingEventBus::new();
        let clone = bus.clone();
        bus.emit(names::WORKFLOW_FINISH, json!({})).await;
        assert_eq!(clone.len(), 1);
    }

    #[tokio::test]
    async fn null_bus_accepts_anything() {
        NullEventBus.emit("whatever", json!({"k": 1})).await;
    }
}
