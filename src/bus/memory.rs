//! In-process message bus over per-topic broadcast channels.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::{BusError, BusMessage, BusSubscription, CheckpointStore, MessageBus};

/// Retained messages per topic for slow consumers. Beyond this a lagged
/// subscriber drops messages (at-most-once, never backpressure on publish).
const TOPIC_BUFFER: usize = 256;

/// Process-local bus. One shared instance per process; publishers and
/// subscribers all clone the same `Arc`.
pub struct InMemoryBus {
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl InMemoryBus {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            checkpoints,
        }
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        {
            let topics = self.topics.read().await;
            if let Some(tx) = topics.get(topic) {
                return tx.clone();
            }
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let tx = self.sender_for(topic).await;
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            published_at: chrono::Utc::now(),
        };
        // send() errs only when there are no receivers; that's fine for
        // fire-and-forget delivery.
        let _ = tx.send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let tx = self.sender_for(topic).await;
        Ok(BusSubscription::new(topic.to_string(), tx.subscribe()))
    }

    async fn save_checkpoint(&self, workflow_id: &str, blob: &str) -> Result<(), BusError> {
        self.checkpoints.save(workflow_id, blob).await
    }

    async fn load_checkpoint(&self, workflow_id: &str) -> Result<Option<String>, BusError> {
        self.checkpoints.load(workflow_id).await
    }
}
