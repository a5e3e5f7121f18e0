//! Push event type and the per-topic event registry.
//!
//! Events are queued per topic by the response processor and drained by
//! subscribers. Delivery is at-most-once per drain; events for topics with
//! no registered queue are dropped silently.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// One push event emitted by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Logical name the event is queued under (e.g. `"Transfer"`).
    pub topic: String,
    pub block_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
    pub tx_index: u32,
    /// Opaque event data; decoding belongs to the domain layer.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Set when the event was removed by a chain reorganization.
    #[serde(default)]
    pub removed: bool,
}

/// Per-topic queues of pushed events.
#[derive(Default)]
pub struct EventRegistry {
    queues: Mutex<HashMap<String, VecDeque<ChainEvent>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue for `topic`. Idempotent: an existing queue and
    /// its contents are left untouched.
    pub fn subscribe(&self, topic: &str) {
        self.queues
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default();
    }

    /// Remove the queues for the given topics, discarding queued events.
    pub fn unsubscribe(&self, topics: &[&str]) {
        let mut queues = self.queues.lock().unwrap();
        for topic in topics {
            queues.remove(*topic);
        }
    }

    /// Remove every queue.
    pub fn unsubscribe_all(&self) {
        self.queues.lock().unwrap().clear();
    }

    /// Append an event to its topic queue. Returns `false` (event dropped)
    /// when no one is subscribed to the topic.
    pub fn publish(&self, event: ChainEvent) -> bool {
        let mut queues = self.queues.lock().unwrap();
        match queues.get_mut(&event.topic) {
            Some(queue) => {
                queue.push_back(event);
                true
            }
            None => false,
        }
    }

    /// Atomically remove and return all queued events for the given topics,
    /// in arrival order per topic. Unsubscribed topics contribute nothing.
    pub fn drain(&self, topics: &[&str]) -> Vec<ChainEvent> {
        let mut queues = self.queues.lock().unwrap();
        let mut out = Vec::new();
        for topic in topics {
            if let Some(queue) = queues.get_mut(*topic) {
                out.extend(queue.drain(..));
            }
        }
        out
    }

    /// Returns `true` if a queue exists for `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.queues.lock().unwrap().contains_key(topic)
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.queues.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: &str, block: u64) -> ChainEvent {
        ChainEvent {
            topic: topic.to_string(),
            block_hash: format!("0x{block:064x}"),
            block_number: block,
            log_index: 0,
            tx_hash: "0xabc".into(),
            tx_index: 1,
            payload: vec![],
            removed: false,
        }
    }

    #[test]
    fn drain_returns_in_arrival_order_then_empty() {
        let reg = EventRegistry::new();
        reg.subscribe("Transfer");
        assert!(reg.publish(event("Transfer", 1)));
        assert!(reg.publish(event("Transfer", 2)));

        let drained = reg.drain(&["Transfer"]);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].block_number, 1);
        assert_eq!(drained[1].block_number, 2);

        assert!(reg.drain(&["Transfer"]).is_empty());
        assert!(reg.drain(&["Unsubscribed"]).is_empty());
    }

    #[test]
    fn publish_without_subscriber_drops() {
        let reg = EventRegistry::new();
        assert!(!reg.publish(event("Approval", 5)));
        reg.subscribe("Approval");
        assert!(reg.drain(&["Approval"]).is_empty());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let reg = EventRegistry::new();
        reg.subscribe("Transfer");
        reg.publish(event("Transfer", 9));
        reg.subscribe("Transfer");
        assert_eq!(reg.drain(&["Transfer"]).len(), 1, "resubscribe must not drop queued events");
    }

    #[test]
    fn unsubscribe_removes_queue() {
        let reg = EventRegistry::new();
        reg.subscribe("A");
        reg.subscribe("B");
        reg.unsubscribe(&["A"]);
        assert!(!reg.is_subscribed("A"));
        assert!(reg.is_subscribed("B"));
        reg.unsubscribe_all();
        assert!(reg.is_empty());
    }
}
