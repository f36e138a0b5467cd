//! MQTT message bus.
//!
//! Messages are published and subscribed with QoS 1, so a deployment event
//! may be delivered more than once; consumers dedupe.

use async_trait::async_trait;
use bytes::Bytes;
use furnace_core::bus::MessageBus;
use furnace_core::{Error, MessageId, Result};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, info, warn};
use url::Url;

const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 10;
const INCOMING_CAPACITY: usize = 256;
const HELD_CAPACITY: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Incoming publishes, fanned out per topic.
///
/// The broker starts delivering queued messages of a persistent session right
/// after ConnAck, possibly before anyone subscribed locally. Those messages
/// are held per topic and handed to the first subscriber.
#[derive(Default)]
struct Inbox {
    subscribers: HashMap<String, broadcast::Sender<Bytes>>,
    held: HashMap<String, VecDeque<Bytes>>,
}

impl Inbox {
    fn deliver(&mut self, topic: &str, payload: Bytes) {
        let payload = match self.subscribers.get(topic) {
            Some(sender) => match sender.send(payload) {
                Ok(_) => return,
                Err(broadcast::error::SendError(payload)) => payload,
            },
            None => payload,
        };

        let held = self.held.entry(topic.to_string()).or_default();
        if held.len() == HELD_CAPACITY {
            held.pop_front();
            warn!(topic = %topic, "No subscriber yet; dropping oldest held message");
        }
        debug!(topic = %topic, held = held.len() + 1, "Holding message until subscribed");
        held.push_back(payload);
    }

    /// Register a receiver for `topic` and take whatever was held for it.
    fn subscribe(&mut self, topic: &str) -> (broadcast::Receiver<Bytes>, Vec<Bytes>) {
        let receiver = self
            .subscribers
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(INCOMING_CAPACITY).0)
            .subscribe();
        let held = self.held.remove(topic).map(Vec::from).unwrap_or_default();
        (receiver, held)
    }
}

/// Publishers waiting for the broker's PubAck.
///
/// Waiters are queued in the order their requests entered the client and
/// bound to a packet id when the event loop sends the publish.
#[derive(Default)]
struct Acks {
    queued: VecDeque<oneshot::Sender<()>>,
    inflight: HashMap<u16, oneshot::Sender<()>>,
    /// Sent before a disconnect; the event loop retransmits these on reconnect.
    abandoned: HashSet<u16>,
}

impl Acks {
    fn sent(&mut self, pkid: u16) {
        if self.abandoned.remove(&pkid) || self.inflight.contains_key(&pkid) {
            return;
        }
        if let Some(waiter) = self.queued.pop_front() {
            self.inflight.insert(pkid, waiter);
        }
    }

    fn acked(&mut self, pkid: u16) {
        if let Some(waiter) = self.inflight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    /// Fail every publish already on the wire.
    fn disconnected(&mut self) {
        let pkids: Vec<u16> = self.inflight.drain().map(|(pkid, _)| pkid).collect();
        self.abandoned.extend(pkids);
    }
}

/// State shared between the bus handle and its event loop task.
#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    inbox: Mutex<Inbox>,
    acks: Mutex<Acks>,
    topics: Mutex<HashSet<String>>,
}

/// Message bus backed by an MQTT broker.
pub struct MqttBus {
    client: AsyncClient,
    shared: Arc<Shared>,
    publishing: tokio::sync::Mutex<()>,
    event_loop: JoinHandle<()>,
}

/// Broker options from a `mqtt://[user:pass@]host[:port]` URL.
fn mqtt_options(url: &Url, client_id: &str, persistent_session: bool) -> Result<MqttOptions> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Internal(format!("MQTT URL has no host: {}", url)))?;
    let port = url.port().unwrap_or(DEFAULT_PORT);

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(!persistent_session);
    if !url.username().is_empty() {
        options.set_credentials(url.username(), url.password().unwrap_or_default());
    }
    Ok(options)
}

impl MqttBus {
    /// Connect to the broker at `url`.
    ///
    /// With a persistent session the broker keeps subscriptions and queued
    /// QoS 1 messages for `client_id` across reconnects.
    pub fn connect(url: &Url, client_id: &str, persistent_session: bool) -> Result<Self> {
        let options = mqtt_options(url, client_id, persistent_session)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let shared = Arc::new(Shared::default());

        info!(
            host = url.host_str().unwrap_or_default(),
            client_id = %client_id,
            persistent_session,
            "Connecting to MQTT broker"
        );

        let event_loop = tokio::spawn(drive(event_loop, client.clone(), shared.clone()));

        Ok(Self {
            client,
            shared,
            publishing: tokio::sync::Mutex::new(()),
            event_loop,
        })
    }

    /// Whether the broker accepted the current connection.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Poll the event loop forever, routing incoming publishes and PubAcks.
/// Subscriptions are renewed when the broker did not keep the session.
async fn drive(mut event_loop: EventLoop, client: AsyncClient, shared: Arc<Shared>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "Received message");
                lock(&shared.inbox).deliver(&publish.topic, publish.payload);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                lock(&shared.acks).acked(ack.pkid);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                lock(&shared.acks).sent(pkid);
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!(code = ?ack.code, "MQTT broker refused the connection");
                    continue;
                }
                info!(session_present = ack.session_present, "MQTT connected");
                shared.connected.store(true, Ordering::Release);
                if !ack.session_present {
                    let topics: Vec<String> = lock(&shared.topics).iter().cloned().collect();
                    for topic in topics {
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            error!(topic = %topic, error = %e, "Failed to renew subscription");
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                shared.connected.store(false, Ordering::Release);
                lock(&shared.acks).disconnected();
                warn!(error = %e, "MQTT connection error; reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    /// Publish and wait for the broker's acknowledgement.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<MessageId> {
        if !self.is_connected() {
            return Err(Error::Unavailable("MQTT broker is not connected".to_string()));
        }

        let (acked_tx, acked) = oneshot::channel();
        {
            // Waiters must be queued in the same order as the requests.
            let _publishing = self.publishing.lock().await;
            lock(&self.shared.acks).queued.push_back(acked_tx);
            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
                .await
            {
                lock(&self.shared.acks).queued.pop_back();
                return Err(Error::Unavailable(format!("MQTT publish failed: {}", e)));
            }
        }

        acked.await.map_err(|_| {
            Error::Unavailable("MQTT connection lost before the broker acknowledged".to_string())
        })?;

        let message_id = MessageId::generate();
        debug!(topic = %topic, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>> {
        let (receiver, held) = lock(&self.shared.inbox).subscribe(topic);
        lock(&self.shared.topics).insert(topic.to_string());

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Unavailable(format!("MQTT subscribe failed: {}", e)))?;
        info!(topic = %topic, held = held.len(), "Subscribed");

        Ok(subscription(topic, receiver, held))
    }
}

/// Held messages first, then live ones.
fn subscription(
    topic: &str,
    receiver: broadcast::Receiver<Bytes>,
    held: Vec<Bytes>,
) -> BoxStream<'static, Bytes> {
    let topic = topic.to_string();
    let live = BroadcastStream::new(receiver).filter_map(move |result| {
        let topic = topic.clone();
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
    stream::iter(held).chain(live).boxed()
}
