//! In-process message bus.

use async_trait::async_trait;
use bytes::Bytes;
use furnace_core::bus::MessageBus;
use furnace_core::{Error, MessageId, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel per topic.
///
/// Publishing to a topic nobody subscribes to fails; there is no
/// buffering for late subscribers.
pub struct MemoryBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<MessageId> {
        let receivers = self
            .sender(topic)
            .send(payload)
            .map_err(|_| Error::Unavailable(format!("no subscribers on topic {}", topic)))?;

        let message_id = MessageId::generate();
        debug!(topic = %topic, receivers, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>> {
        let topic_name = topic.to_string();
        let stream = BroadcastStream::new(self.sender(topic).subscribe()).filter_map(move |result| {
            let topic = topic_name.clone();
            async move {
                match result {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "Subscriber lagged; messages dropped");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
