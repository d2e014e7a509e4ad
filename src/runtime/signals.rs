//! Signal hub: external wakeups for `wait` and `webhook` nodes.
//!
//! The executor has no inbound transport of its own; hosts deliver events
//! (`order.paid`, `webhook:<nodeId>`) through this hub and suspended nodes
//! resume with the delivered payload. Delivery before anyone waits is
//! buffered, so tests and hosts do not race the scheduler.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct HubState {
    /// Delivered but not yet consumed payloads, per event name.
    ready: HashMap<String, VecDeque<Value>>,
    /// Parked waiters, per event name.
    waiting: HashMap<String, Vec<oneshot::Sender<Value>>>,
}

/// Cloneable handle to the shared hub.
#[derive(Debug, Clone, Default)]
pub struct SignalHub {
    state: Arc<Mutex<HubState>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a payload for `event`. Wakes the oldest waiter if one is
    /// parked, otherwise buffers the payload for the next `wait_for`.
    pub fn deliver(&self, event: &str, payload: Value) {
        let sender = {
            let mut state = self.state.lock();
            match state.waiting.get_mut(event) {
                Some(waiters) if !waiters.is_empty() => Some(waiters.remove(0)),
                _ => {
                    state
                        .ready
                        .entry(event.to_string())
                        .or_default()
                        .push_back(payload.clone());
                    None
                }
            }
        };
        if let Some(sender) = sender {
            // Receiver dropped means the waiter was cancelled; the payload
            // is gone with it, matching one-shot delivery.
            let _ = sender.send(payload);
        }
    }

    /// Suspend until a payload for `event` arrives.
    pub async fn wait_for(&self, event: &str) -> Value {
        let receiver = {
            let mut state = self.state.lock();
            if let Some(queue) = state.ready.get_mut(event) {
                if let Some(payload) = queue.pop_front() {
                    return payload;
                }
            }
            let (sender, receiver) = oneshot::channel();
            state
                .waiting
                .entry(event.to_string())
                .or_default()
                .push(sender);
            receiver
        };
        receiver.await.unwrap_or(Value::Null)
    }

    /// Number of buffered payloads for `event`.
    pub fn pending(&self, event: &str) -> usize {
        self.state
            .lock()
            .ready
            .get(event)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn delivery_before_wait_is_buffered() {
        let hub = SignalHub::new();
        hub.deliver("order.paid", json!({"orderId": "o-1"}));
        assert_eq!(hub.pending("order.paid"), 1);

        let payload = hub.wait_for("order.paid").await;
        assert_eq!(payload, json!({"orderId": "o-1"}));
        assert_eq!(hub.pending("order.paid"), 0);
    }

    #[tokio::test]
    async fn wait_before_delivery_resumes() {
        let hub = SignalHub::new();
        let waiter = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait_for("webhook:hook_1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.deliver("webhook:hook_1", json!({"body": "ok"}));

        let payload = waiter.await.unwrap();
        assert_eq!(payload, json!({"body": "ok"}));
    }

    #[tokio::test]
    async fn each_delivery_wakes_one_waiter() {
        let hub = SignalHub::new();
        let first = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait_for("tick").await })
        };
        let second = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait_for("tick").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.deliver("tick", json!(1));
        hub.deliver("tick", json!(2));

        let mut received = vec![first.await.unwrap(), second.await.unwrap()];
        received.sort_by_key(|v| v.as_i64());
        assert_eq!(received, vec![json!(1), json!(2)]);
    }
}
