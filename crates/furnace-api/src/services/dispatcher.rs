//! Hands registered deployments to the exec stage over the message bus.

use furnace_core::bus::MessageBus;
use furnace_core::error::with_timeout;
use furnace_core::{DeploymentEvent, Error, MessageId, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bus,
            topic: topic.into(),
            timeout,
        }
    }

    /// Publish `event` once. Retries, if any, belong to the bus.
    pub async fn dispatch(&self, event: &DeploymentEvent) -> Result<MessageId> {
        let payload = event.to_payload()?;
        let publish = self.bus.publish(&self.topic, payload);
        let message_id = with_timeout(self.timeout, "publish", publish)
            .await
            .map_err(|e| Error::Dispatch(e.to_string()))?;

        info!(
            message_id = %message_id,
            topic = %self.topic,
            bus = self.bus.name(),
            deployment_id = %event.deployment_id,
            environment = %event.environment,
            "Published deployment event"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::FakeBus;
    use furnace_core::DeploymentId;

    fn event() -> DeploymentEvent {
        DeploymentEvent {
            remote_url: "https://github.com/o/r".to_string(),
            commit_ref: "abc123".to_string(),
            deployment_id: DeploymentId::from("42"),
            environment: "staging".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publishes_once_to_topic() {
        let bus = Arc::new(FakeBus::default());
        let dispatcher = Dispatcher::new(bus.clone(), "deployments", Duration::from_secs(1));
        dispatcher.dispatch(&event()).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "deployments");
        assert_eq!(DeploymentEvent::from_payload(&published[0].1).unwrap(), event());
    }

    #[tokio::test]
    async fn test_bus_failure_is_dispatch_error() {
        let dispatcher = Dispatcher::new(
            Arc::new(FakeBus::failing()),
            "deployments",
            Duration::from_secs(1),
        );
        let err = dispatcher.dispatch(&event()).await.unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
    }
}
