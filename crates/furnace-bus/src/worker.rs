//! Exec stage consumer: launches a deploy task for each deployment event.

use bytes::Bytes;
use furnace_core::bus::MessageBus;
use furnace_core::{DeploymentEvent, DeploymentId, Error, Result};
use furnace_executor::ExecutionLauncher;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Remembers the most recent deployment ids so redelivered events are
/// launched at most once per process.
#[derive(Debug)]
struct DedupeWindow {
    capacity: usize,
    order: VecDeque<DeploymentId>,
    seen: HashSet<DeploymentId>,
}

impl DedupeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id`; false if it is already in the window.
    fn insert(&mut self, id: &DeploymentId) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.seen.insert(id.clone());
        true
    }
}

/// Subscribes to the deployment topic and hands each event to the launcher.
pub struct EventConsumer {
    bus: Arc<dyn MessageBus>,
    topic: String,
    launcher: Arc<ExecutionLauncher>,
    window: Mutex<DedupeWindow>,
}

impl EventConsumer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
        launcher: Arc<ExecutionLauncher>,
        dedupe_window: usize,
    ) -> Self {
        Self {
            bus,
            topic: topic.into(),
            launcher,
            window: Mutex::new(DedupeWindow::new(dedupe_window)),
        }
    }

    /// Subscribe and consume until the subscription ends.
    pub async fn run(&self) -> Result<()> {
        let messages = self.subscribe().await?;
        self.consume(messages).await
    }

    /// Subscribe to the deployment topic without consuming yet.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, Bytes>> {
        let messages = self.bus.subscribe(&self.topic).await?;
        info!(
            topic = %self.topic,
            bus = self.bus.name(),
            backend = self.launcher.backend_name(),
            "Exec consumer subscribed"
        );
        Ok(messages)
    }

    /// Handle every message from `messages`.
    pub async fn consume(&self, mut messages: BoxStream<'static, Bytes>) -> Result<()> {
        while let Some(payload) = messages.next().await {
            self.handle(&payload);
        }

        warn!(topic = %self.topic, "Subscription ended");
        Err(Error::Unavailable(format!("subscription to {} ended", self.topic)))
    }

    /// Decode one message and launch its task in the background.
    ///
    /// Undecodable payloads and duplicates are dropped. Launch failures are
    /// logged; nothing is reported back to the trigger stage.
    pub fn handle(&self, payload: &Bytes) -> Option<JoinHandle<()>> {
        let event = match DeploymentEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Dropping undecodable deployment event");
                return None;
            }
        };

        let fresh = self
            .window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(&event.deployment_id);
        if !fresh {
            info!(deployment_id = %event.deployment_id, "Skipping redelivered deployment event");
            return None;
        }

        info!(
            deployment_id = %event.deployment_id,
            environment = %event.environment,
            commit_ref = %event.commit_ref,
            "Received deployment event"
        );

        let launcher = self.launcher.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = launcher.launch(&event).await {
                error!(
                    deployment_id = %event.deployment_id,
                    environment = %event.environment,
                    error = %e,
                    "Deploy task launch failed"
                );
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use async_trait::async_trait;
    use furnace_core::backend::{ComputeBackend, ExecutionTaskSpec, ResourceRequest, TaskHandle};
    use furnace_core::secret::{MemorySecretStore, SecretResolver};
    use furnace_executor::LaunchConfig;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Forwards every launched spec to a channel.
    struct ChannelBackend {
        tx: mpsc::UnboundedSender<ExecutionTaskSpec>,
        failing: bool,
    }

    #[async_trait]
    impl ComputeBackend for ChannelBackend {
        fn name(&self) -> &'static str {
            "channel"
        }

        async fn launch(&self, spec: ExecutionTaskSpec) -> Result<TaskHandle> {
            let task_id = spec.name.clone();
            let _ = self.tx.send(spec);
            if self.failing {
                return Err(Error::Launch("no capacity".to_string()));
            }
            Ok(TaskHandle {
                task_id,
                backend: "channel".to_string(),
                already_running: false,
            })
        }
    }

    fn consumer(
        bus: Arc<dyn MessageBus>,
        failing: bool,
    ) -> (EventConsumer, mpsc::UnboundedReceiver<ExecutionTaskSpec>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(MemorySecretStore::new());
        let secrets = SecretResolver::new(store, Duration::from_secs(1));
        let config = LaunchConfig {
            instance: "furnace".to_string(),
            image: "furnace/deploy:latest".to_string(),
            git_username: "unset".to_string(),
            passthrough: BTreeMap::new(),
            task_secrets: vec![],
            resources: ResourceRequest::default(),
            timeout: Duration::from_secs(1),
        };
        let backend = Arc::new(ChannelBackend { tx, failing });
        let launcher = ExecutionLauncher::new(backend, secrets, config);
        (
            EventConsumer::new(bus, "deployments", Arc::new(launcher), 16),
            rx,
        )
    }

    fn event(id: &str) -> DeploymentEvent {
        DeploymentEvent {
            remote_url: "https://github.com/acme/infra.git".to_string(),
            commit_ref: "abc123".to_string(),
            deployment_id: DeploymentId::from(id),
            environment: "staging".to_string(),
        }
    }

    #[test]
    fn test_dedupe_window_evicts_oldest() {
        let mut window = DedupeWindow::new(2);
        let (a, b, c) = (
            DeploymentId::from("a"),
            DeploymentId::from("b"),
            DeploymentId::from("c"),
        );
        assert!(window.insert(&a));
        assert!(window.insert(&b));
        assert!(!window.insert(&a));
        assert!(window.insert(&c));
        assert!(window.insert(&a));
        assert!(!window.insert(&c));
    }

    #[tokio::test]
    async fn test_redelivered_event_launches_once() {
        let (consumer, mut launched) = consumer(Arc::new(MemoryBus::new()), false);
        let payload = event("42").to_payload().unwrap();

        consumer.handle(&payload).unwrap().await.unwrap();
        assert!(consumer.handle(&payload).is_none());

        let spec = launched.recv().await.unwrap();
        assert_eq!(spec.name, "furnace-deploy-42");
        assert_eq!(spec.env["STACK_ENV"], "staging");
        assert!(launched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let (consumer, mut launched) = consumer(Arc::new(MemoryBus::new()), false);
        assert!(consumer.handle(&Bytes::from_static(b"not json")).is_none());
        assert!(consumer.handle(&Bytes::from_static(b"{\"remoteUrl\":1}")).is_none());
        assert!(launched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_launch_failure_is_contained() {
        let (consumer, mut launched) = consumer(Arc::new(MemoryBus::new()), true);
        let payload = event("7").to_payload().unwrap();

        consumer.handle(&payload).unwrap().await.unwrap();
        assert_eq!(launched.recv().await.unwrap().name, "furnace-deploy-7");
    }

    #[tokio::test]
    async fn test_consumes_from_bus() {
        let bus = Arc::new(MemoryBus::new());
        let (consumer, mut launched) = consumer(bus.clone(), false);
        let consumer = Arc::new(consumer);

        let messages = consumer.subscribe().await.unwrap();
        let running = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.consume(messages).await })
        };

        let payload = event("99").to_payload().unwrap();
        bus.publish("deployments", payload).await.unwrap();

        let spec = tokio::time::timeout(Duration::from_secs(2), launched.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spec.env["DEPLOYMENT_ID"], "99");

        running.abort();
    }
}
