//! Client side of the publish/subscribe transport.
//!
//! Owns the single physical broker connection for the station: connection
//! state tracking, shared connect attempts, reference-counted topic
//! subscriptions, retained presence with heartbeat, and automatic
//! reconnection over a bounded retry period.

pub mod broker;
pub mod tcp;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dto::presence::{PRESENCE_OFFLINE, PRESENCE_ONLINE, presence_topic};
use crate::state::timer::ScheduledTask;
use crate::transport::broker::{
    BrokerWire, ConnectOptions, LastWill, Message, TransportError, WireCommand, WireEvent,
};

/// Handshake deadline for one connection attempt.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(35);
/// Heartbeat cadence republishing the retained online flag.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(45);
/// Grace period before the broker publishes the last-will.
pub const WILL_DELAY: Duration = Duration::from_secs(5);

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Connection lifecycle of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No connection and none being attempted.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Link established.
    Connected,
    /// Link lost; automatic retries in progress.
    Reconnecting,
}

/// Publish options; delivery is QoS 0 throughout.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Ask the broker to retain the payload for future subscribers.
    pub retain: bool,
}

type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

struct TopicEntry {
    handlers: Vec<(u64, Handler)>,
    last_seen_ms: u64,
}

struct ClientShared {
    wire: Arc<dyn BrokerWire>,
    client_id: String,
    status: watch::Sender<ConnectionStatus>,
    topics: DashMap<String, TopicEntry>,
    link: std::sync::Mutex<Option<mpsc::UnboundedSender<WireCommand>>>,
    connect_gate: tokio::sync::Mutex<()>,
    reader: std::sync::Mutex<Option<ScheduledTask>>,
    heartbeat: std::sync::Mutex<Option<ScheduledTask>>,
    presence_sub: std::sync::Mutex<Option<Subscription>>,
    next_handler_id: AtomicU64,
}

impl ClientShared {
    fn set_status(&self, status: ConnectionStatus) {
        let changed = *self.status.borrow() != status;
        if changed {
            let _ = self.status.send(status);
        }
    }

    fn send_command(&self, command: WireCommand) -> Result<(), TransportError> {
        let guard = self
            .link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(sender) => sender.send(command).map_err(|_| TransportError::NotConnected),
            None => Err(TransportError::NotConnected),
        }
    }

    fn install_link(&self, sender: mpsc::UnboundedSender<WireCommand>) {
        *self
            .link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sender);
    }

    fn clear_link(&self) {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Re-issue network subscriptions for every refcounted topic.
    fn resubscribe_all(&self) {
        for entry in self.topics.iter() {
            let _ = self.send_command(WireCommand::Subscribe {
                topic: entry.key().clone(),
            });
        }
    }

    fn announce_online(&self) {
        let _ = self.send_command(WireCommand::Publish {
            topic: presence_topic(&self.client_id),
            payload: PRESENCE_ONLINE.into(),
            retain: true,
        });
    }

    /// Dispatch one inbound message, suppressing duplicates by stamp.
    fn dispatch(&self, message: &Message) {
        let handlers: Vec<Handler> = {
            let Some(mut entry) = self.topics.get_mut(&message.topic) else {
                return;
            };
            if entry.last_seen_ms >= message.timestamp_ms {
                debug!(topic = %message.topic, stamp = message.timestamp_ms, "dropping duplicate delivery");
                return;
            }
            entry.last_seen_ms = message.timestamp_ms;
            entry.handlers.iter().map(|(_, handler)| Arc::clone(handler)).collect()
        };
        for handler in handlers {
            handler(message);
        }
    }
}

/// Guard for one handler registration. Dropping the last guard of a topic
/// issues the network unsubscribe.
pub struct Subscription {
    client: std::sync::Weak<ClientShared>,
    topic: String,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(shared) = self.client.upgrade() else {
            return;
        };
        {
            let Some(mut entry) = shared.topics.get_mut(&self.topic) else {
                return;
            };
            entry.handlers.retain(|(id, _)| *id != self.id);
        }
        let removed = shared
            .topics
            .remove_if(&self.topic, |_, entry| entry.handlers.is_empty())
            .is_some();
        if removed {
            let _ = shared.send_command(WireCommand::Unsubscribe {
                topic: self.topic.clone(),
            });
        }
    }
}

/// Handle to the station's broker connection.
#[derive(Clone)]
pub struct BrokerClient {
    shared: Arc<ClientShared>,
}

impl BrokerClient {
    /// Client over a wire, not yet connected.
    pub fn new(wire: Arc<dyn BrokerWire>, client_id: impl Into<String>) -> Self {
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(ClientShared {
                wire,
                client_id: client_id.into(),
                status,
                topics: DashMap::new(),
                link: std::sync::Mutex::new(None),
                connect_gate: tokio::sync::Mutex::new(()),
                reader: std::sync::Mutex::new(None),
                heartbeat: std::sync::Mutex::new(None),
                presence_sub: std::sync::Mutex::new(None),
                next_handler_id: AtomicU64::new(0),
            }),
        }
    }

    /// Client id on the wire.
    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    /// Observe connection status transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            client_id: self.shared.client_id.clone(),
            will: LastWill {
                topic: presence_topic(&self.shared.client_id),
                payload: PRESENCE_OFFLINE.into(),
                retain: true,
                delay: WILL_DELAY,
            },
        }
    }

    /// Establish the connection. At most one attempt runs at a time;
    /// concurrent callers queue on the gate and observe its outcome. A
    /// failure before the first success rejects the call and leaves the
    /// client torn down.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let _gate = self.shared.connect_gate.lock().await;
        if *self.shared.status.borrow() == ConnectionStatus::Connected {
            return Ok(());
        }
        self.shared.set_status(ConnectionStatus::Connecting);

        let attempt = self.shared.wire.connect(self.connect_options());
        let link = match timeout(HANDSHAKE_TIMEOUT, attempt).await {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => {
                self.teardown();
                return Err(err);
            }
            Err(_elapsed) => {
                self.teardown();
                return Err(TransportError::HandshakeTimeout);
            }
        };

        self.shared.install_link(link.commands);

        // Watch our own retained presence flag; the successful subscription
        // is the precondition for announcing ourselves online.
        let own_presence = presence_topic(&self.shared.client_id);
        let client_id = self.shared.client_id.clone();
        let presence_sub = self.subscribe(own_presence, move |message| {
            debug!(client_id, payload = %message.payload, "self presence update");
        });
        *self
            .shared
            .presence_sub
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(presence_sub);

        self.shared.resubscribe_all();
        self.shared.announce_online();
        self.start_heartbeat();
        self.start_reader(link.events);
        self.shared.set_status(ConnectionStatus::Connected);
        info!(client_id = %self.shared.client_id, "broker connection established");
        Ok(())
    }

    /// Register a message handler for a topic. The first handler issues the
    /// network subscribe; later ones share it without touching the wire.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Subscription {
        let topic = topic.into();
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::SeqCst);
        let first = {
            let mut entry = self.shared.topics.entry(topic.clone()).or_insert_with(|| TopicEntry {
                handlers: Vec::new(),
                last_seen_ms: 0,
            });
            let first = entry.handlers.is_empty();
            entry.handlers.push((id, Arc::new(handler)));
            first
        };
        if first {
            // Failing here only means we are offline; install_link's
            // resubscribe pass covers the topic on (re)connect.
            let _ = self
                .shared
                .send_command(WireCommand::Subscribe { topic: topic.clone() });
        }
        Subscription {
            client: Arc::downgrade(&self.shared),
            topic,
            id,
        }
    }

    /// Publish a message. Fails when no link is established.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<String>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        self.shared.send_command(WireCommand::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: options.retain,
        })
    }

    /// Graceful shutdown: best-effort offline presence, then drop the link
    /// without firing the last-will.
    pub async fn disconnect(&self) {
        let _ = self.shared.send_command(WireCommand::Publish {
            topic: presence_topic(&self.shared.client_id),
            payload: PRESENCE_OFFLINE.into(),
            retain: true,
        });
        let _ = self.shared.send_command(WireCommand::Disconnect);
        self.teardown();
        info!(client_id = %self.shared.client_id, "broker connection closed");
    }

    fn teardown(&self) {
        self.shared
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.shared
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.shared
            .presence_sub
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.shared.clear_link();
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    fn start_heartbeat(&self) {
        let shared = Arc::clone(&self.shared);
        let task = ScheduledTask::spawn(async move {
            let mut ticks = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticks.tick().await; // the connect path already announced online
            loop {
                ticks.tick().await;
                if *shared.status.borrow() == ConnectionStatus::Connected {
                    shared.announce_online();
                }
            }
        });
        *self
            .shared
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
    }

    fn start_reader(&self, events: mpsc::UnboundedReceiver<WireEvent>) {
        let shared = Arc::clone(&self.shared);
        let options = self.connect_options();
        let task = ScheduledTask::spawn(drive(shared, options, events));
        *self
            .shared
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
    }
}

/// Reader loop: deliver messages, and on link loss run the bounded
/// reconnection schedule. Failures here never surface as errors, only as
/// status transitions.
async fn drive(
    shared: Arc<ClientShared>,
    options: ConnectOptions,
    mut events: mpsc::UnboundedReceiver<WireEvent>,
) {
    loop {
        while let Some(event) = events.recv().await {
            match event {
                WireEvent::Message(message) => shared.dispatch(&message),
                WireEvent::Closed { reason } => {
                    warn!(client_id = %shared.client_id, reason, "broker link closed");
                    break;
                }
            }
        }

        shared.clear_link();
        shared.set_status(ConnectionStatus::Reconnecting);

        match reconnect(&shared, &options).await {
            Some(new_events) => {
                events = new_events;
                shared.resubscribe_all();
                shared.announce_online();
                shared.set_status(ConnectionStatus::Connected);
                info!(client_id = %shared.client_id, "broker connection reestablished");
            }
            None => {
                warn!(client_id = %shared.client_id, "reconnection attempts exhausted");
                shared.set_status(ConnectionStatus::Disconnected);
                return;
            }
        }
    }
}

/// Jittered exponential backoff over a bounded number of attempts.
async fn reconnect(
    shared: &Arc<ClientShared>,
    options: &ConnectOptions,
) -> Option<mpsc::UnboundedReceiver<WireEvent>> {
    let mut delay = RECONNECT_INITIAL_DELAY;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        tokio::time::sleep(delay + jitter).await;

        let outcome = timeout(HANDSHAKE_TIMEOUT, shared.wire.connect(options.clone())).await;
        match outcome {
            Ok(Ok(link)) => {
                shared.install_link(link.commands);
                return Some(link.events);
            }
            Ok(Err(err)) => {
                warn!(attempt, error = %err, "reconnect attempt failed");
            }
            Err(_elapsed) => {
                warn!(attempt, "reconnect attempt timed out");
            }
        }
        delay = (delay * 2).min(RECONNECT_MAX_DELAY);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::broker::InMemoryBroker;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_announces_retained_presence_and_heartbeats() {
        let hub = InMemoryBroker::new();
        let client = BrokerClient::new(Arc::new(hub.clone()), "station-1");
        client.connect().await.unwrap();
        settle().await;

        assert_eq!(
            hub.retained_payload("state/station-1").as_deref(),
            Some("online")
        );
        assert_eq!(*client.status().borrow(), ConnectionStatus::Connected);

        // The heartbeat keeps republishing the retained flag.
        tokio::time::advance(HEARTBEAT_INTERVAL + Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(
            hub.retained_payload("state/station-1").as_deref(),
            Some("online")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refusal_before_first_connect_rejects_and_tears_down() {
        let hub = InMemoryBroker::new();
        hub.set_refuse(true);
        let client = BrokerClient::new(Arc::new(hub.clone()), "station-1");

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Refused(_)));
        assert_eq!(*client.status().borrow(), ConnectionStatus::Disconnected);
        assert!(matches!(
            client.publish("cmd", "x", PublishOptions::default()),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_are_reference_counted() {
        let hub = InMemoryBroker::new();
        let client = BrokerClient::new(Arc::new(hub.clone()), "station-1");
        client.connect().await.unwrap();
        settle().await;

        let first = client.subscribe("cmd", |_message| {});
        let second = client.subscribe("cmd", |_message| {});
        settle().await;
        assert_eq!(hub.subscriber_count("cmd"), 1);

        drop(first);
        settle().await;
        assert_eq!(hub.subscriber_count("cmd"), 1);

        drop(second);
        settle().await;
        assert_eq!(hub.subscriber_count("cmd"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_share_one_wire_subscription() {
        let hub = InMemoryBroker::new();
        let client = BrokerClient::new(Arc::new(hub.clone()), "station-1");
        client.connect().await.unwrap();
        settle().await;

        let seen_a = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(AtomicUsize::new(0));
        let count_a = Arc::clone(&seen_a);
        let count_b = Arc::clone(&seen_b);
        let _sub_a = client.subscribe("cmd", move |_m| {
            count_a.fetch_add(1, Ordering::SeqCst);
        });
        let _sub_b = client.subscribe("cmd", move |_m| {
            count_b.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        let publisher = BrokerClient::new(Arc::new(hub.clone()), "host");
        publisher.connect().await.unwrap();
        settle().await;
        publisher
            .publish("cmd", "race-1", PublishOptions::default())
            .unwrap();
        settle().await;

        assert_eq!(seen_a.load(Ordering::SeqCst), 1);
        assert_eq!(seen_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_reconnects_and_resubscribes() {
        let hub = InMemoryBroker::new();
        let client = BrokerClient::new(Arc::new(hub.clone()), "station-1");
        client.connect().await.unwrap();
        settle().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&seen);
        let _sub = client.subscribe("cmd", move |_m| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        let mut status = client.status();
        hub.kick("station-1");
        settle().await;

        // Reconnecting is observable, then the link comes back.
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if *status.borrow_and_update() == ConnectionStatus::Connected {
                    break;
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .expect("reconnected");
        settle().await;

        let publisher = BrokerClient::new(Arc::new(hub.clone()), "host");
        publisher.connect().await.unwrap();
        settle().await;
        publisher
            .publish("cmd", "race-1", PublishOptions::default())
            .unwrap();
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_stamps_are_suppressed() {
        let hub = InMemoryBroker::new();
        let client = BrokerClient::new(Arc::new(hub), "station-1");
        client.connect().await.unwrap();
        settle().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&seen);
        let _sub = client.subscribe("cmd", move |_m| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let message = Message {
            topic: "cmd".into(),
            payload: "race-1".into(),
            retain: false,
            timestamp_ms: 10_000,
        };
        client.shared.dispatch(&message);
        client.shared.dispatch(&message);
        let stale = Message {
            timestamp_ms: 9_999,
            ..message.clone()
        };
        client.shared.dispatch(&stale);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_disconnect_publishes_offline() {
        let hub = InMemoryBroker::new();
        let client = BrokerClient::new(Arc::new(hub.clone()), "station-1");
        client.connect().await.unwrap();
        settle().await;

        client.disconnect().await;
        settle().await;
        assert_eq!(
            hub.retained_payload("state/station-1").as_deref(),
            Some("offline")
        );
        assert_eq!(*client.status().borrow(), ConnectionStatus::Disconnected);
    }
}
