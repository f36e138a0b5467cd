//! Message bus abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{MessageId, Result};

/// Trait for publish/subscribe transports between the trigger and exec stages.
///
/// Delivery is at-least-once; subscribers must tolerate duplicates.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Name of this bus implementation.
    fn name(&self) -> &'static str;

    /// Publish one payload to `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<MessageId>;

    /// Subscribe to `topic`, yielding payloads as they arrive.
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>>;
}
