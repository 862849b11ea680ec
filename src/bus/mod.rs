//! Message bus: pub/sub for lifecycle/status events plus a minimal
//! checkpoint store for workflow state.
//!
//! Delivery is at-most-once to currently-subscribed consumers — there is no
//! durable queue. A subscriber that isn't connected at publish time misses
//! the message, and a new subscription only receives future messages.
//! Checkpoints are overwrite-on-write, last writer wins.
//!
//! Connection-level failures surface as [`BusError`] to the caller; the bus
//! does not reconnect or retry on its own.

mod checkpoint;
mod memory;

pub use checkpoint::{
    create_checkpoint_store, CheckpointStore, CheckpointStoreType, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use memory::InMemoryBus;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Well-known topics published by the core.
pub mod topics {
    /// Agent lifecycle events (started, stopped, unhealthy, recovered).
    pub const AGENT_LIFECYCLE: &str = "agents.lifecycle";
    /// Task submissions with caller metadata.
    pub const TASK_SUBMITTED: &str = "tasks.submitted";
    /// Per-task completion summaries.
    pub const TASK_COMPLETED: &str = "tasks.completed";
    /// Periodic system health snapshots from the monitor loop.
    pub const SYSTEM_HEALTH: &str = "system.health";
}

/// A message carried on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Errors from bus and checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pub/sub + checkpoint contract.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message. Fire-and-forget: succeeds even with zero
    /// subscribers.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError>;

    /// Subscribe to a topic. Receives only messages published after this
    /// call returns.
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError>;

    /// Save a workflow checkpoint, overwriting any previous blob.
    async fn save_checkpoint(&self, workflow_id: &str, blob: &str) -> Result<(), BusError>;

    /// Load the last saved checkpoint for a workflow, if any.
    async fn load_checkpoint(&self, workflow_id: &str) -> Result<Option<String>, BusError>;
}

/// A live subscription to one topic.
///
/// Slow consumers lose messages rather than block publishers (at-most-once
/// semantics): a lagged receiver skips ahead to the oldest retained message.
pub struct BusSubscription {
    topic: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl BusSubscription {
    pub(crate) fn new(topic: String, rx: broadcast::Receiver<BusMessage>) -> Self {
        Self { topic, rx }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next message. `None` once the bus side is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        topic = %self.topic,
                        skipped,
                        "Subscriber lagged; messages dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a lazy, effectively infinite stream.
    pub fn into_stream(mut self) -> impl Stream<Item = BusMessage> {
        async_stream::stream! {
            while let Some(message) = self.next().await {
                yield message;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn publish_reaches_live_subscriber() {
        let bus = InMemoryBus::new(MemoryCheckpointStore::shared());
        let mut sub = bus.subscribe("events").await.unwrap();

        bus.publish("events", json!({"n": 1})).await.unwrap();
        let message = sub.next().await.unwrap();
        assert_eq!(message.topic, "events");
        assert_eq!(message.payload["n"], 1);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_messages() {
        let bus = InMemoryBus::new(MemoryCheckpointStore::shared());

        // Nobody is listening yet; this message is gone forever.
        bus.publish("events", json!({"n": 1})).await.unwrap();

        let mut sub = bus.subscribe("events").await.unwrap();
        bus.publish("events", json!({"n": 2})).await.unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.payload["n"], 2);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InMemoryBus::new(MemoryCheckpointStore::shared());
        let mut sub_a = bus.subscribe("a").await.unwrap();

        bus.publish("b", json!({"for": "b"})).await.unwrap();
        bus.publish("a", json!({"for": "a"})).await.unwrap();

        assert_eq!(sub_a.next().await.unwrap().payload["for"], "a");
    }

    #[tokio::test]
    async fn subscription_works_as_stream() {
        let bus = Arc::new(InMemoryBus::new(MemoryCheckpointStore::shared()));
        let sub = bus.subscribe("events").await.unwrap();
        let mut stream = Box::pin(sub.into_stream());

        bus.publish("events", json!({"n": 1})).await.unwrap();
        bus.publish("events", json!({"n": 2})).await.unwrap();

        assert_eq!(stream.next().await.unwrap().payload["n"], 1);
        assert_eq!(stream.next().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn checkpoint_round_trip() {
        let bus = InMemoryBus::new(MemoryCheckpointStore::shared());
        let blob = r#"{"step": 3, "partial": true}"#;

        bus.save_checkpoint("wf-1", blob).await.unwrap();
        assert_eq!(bus.load_checkpoint("wf-1").await.unwrap().as_deref(), Some(blob));
        assert_eq!(bus.load_checkpoint("wf-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn checkpoint_last_writer_wins() {
        let bus = InMemoryBus::new(MemoryCheckpointStore::shared());
        bus.save_checkpoint("wf-1", "v1").await.unwrap();
        bus.save_checkpoint("wf-1", "v2").await.unwrap();
        assert_eq!(
            bus.load_checkpoint("wf-1").await.unwrap().as_deref(),
            Some("v2")
        );
    }
}
