//! Execution context: the only shared mutable state of a running workflow.
//!
//! An ordered mapping from string keys to JSON values plus immutable
//! execution metadata. Created per execution, mutated in place by nodes,
//! returned to the caller on termination. Scheduling is single-threaded,
//! so access is race-free by construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered key/value store nodes read from and publish into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs(inputs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut context = Self::new();
        for (key, value) in inputs {
            context.set(key, value);
        }
        context
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// Immutable execution facts exposed to every node. `current_node_id` is
/// refreshed by the scheduler on each transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub execution_id: String,
    pub blueprint_id: String,
    pub current_node_id: String,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    pub environment: String,
}
