//! Wire-level broker seam and the in-process broker hub.
//!
//! The client owns everything above this seam (states, reference counting,
//! presence, reconnection). A wire only has to deliver QoS-0 messages in
//! publish order per topic, keep retained payloads, and fire a delayed
//! last-will when a client vanishes without a graceful disconnect. The
//! in-memory hub implements exactly that contract for tests and embedded
//! multi-tab simulations.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

/// One QoS-0 message as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was published on.
    pub topic: String,
    /// Text payload.
    pub payload: String,
    /// Whether the broker keeps this payload for future subscribers.
    pub retain: bool,
    /// Broker-assigned stamp, strictly increasing per broker. Used by the
    /// client to drop duplicate or out-of-order deliveries.
    pub timestamp_ms: u64,
}

/// Testament registered at connect time; the broker publishes it when the
/// client vanishes ungracefully.
#[derive(Debug, Clone)]
pub struct LastWill {
    /// Topic to publish on.
    pub topic: String,
    /// Payload to publish.
    pub payload: String,
    /// Whether the testament is retained.
    pub retain: bool,
    /// Grace period before publishing, cancelled by a reconnect.
    pub delay: Duration,
}

/// Parameters of a wire connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Client identifier, also keying the presence topic.
    pub client_id: String,
    /// Last-will testament.
    pub will: LastWill,
}

/// Commands the client sends down an established link.
#[derive(Debug)]
pub enum WireCommand {
    /// Start receiving messages for a topic.
    Subscribe {
        /// Topic to subscribe.
        topic: String,
    },
    /// Stop receiving messages for a topic.
    Unsubscribe {
        /// Topic to drop.
        topic: String,
    },
    /// Publish a message.
    Publish {
        /// Target topic.
        topic: String,
        /// Text payload.
        payload: String,
        /// Retain flag.
        retain: bool,
    },
    /// Graceful disconnect; suppresses the last-will.
    Disconnect,
}

/// Events an established link delivers to the client.
#[derive(Debug)]
pub enum WireEvent {
    /// An inbound message.
    Message(Message),
    /// The link died; the client decides whether to reconnect.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
}

/// An established wire connection: a command sender and an event receiver.
pub struct WireLink {
    /// Commands toward the broker.
    pub commands: mpsc::UnboundedSender<WireCommand>,
    /// Events from the broker.
    pub events: mpsc::UnboundedReceiver<WireEvent>,
}

/// Transport-layer failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker refused the connection.
    #[error("broker refused the connection: {0}")]
    Refused(String),
    /// No handshake within the connection timeout.
    #[error("connection attempt timed out")]
    HandshakeTimeout,
    /// The operation needs an established connection.
    #[error("not connected to the broker")]
    NotConnected,
    /// I/O failure on the wire.
    #[error("wire failure during {context}")]
    Io {
        /// What the wire was doing.
        context: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

/// Something that can open wire connections to the broker.
pub trait BrokerWire: Send + Sync {
    /// Open a connection, registering the last-will testament.
    fn connect(&self, options: ConnectOptions)
    -> BoxFuture<'static, Result<WireLink, TransportError>>;
}

// ── In-memory hub ───────────────────────────────────────────────────

struct Registration {
    generation: u64,
    subscriptions: std::sync::Mutex<HashSet<String>>,
    events: mpsc::UnboundedSender<WireEvent>,
    will: LastWill,
}

struct HubInner {
    clients: DashMap<String, Arc<Registration>>,
    retained: DashMap<String, Message>,
    stamp: AtomicU64,
    generation: AtomicU64,
    refuse: AtomicBool,
}

/// In-process broker hub implementing the wire contract.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<HubInner>,
}

impl InMemoryBroker {
    /// Empty hub.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: DashMap::new(),
                retained: DashMap::new(),
                stamp: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                refuse: AtomicBool::new(false),
            }),
        }
    }

    /// Make subsequent connection attempts fail (test control).
    pub fn set_refuse(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Sever a client's link from the broker side without a graceful
    /// disconnect, firing its last-will after the registered delay.
    pub fn kick(&self, client_id: &str) {
        let Some((_, registration)) = self.inner.clients.remove(client_id) else {
            return;
        };
        let _ = registration.events.send(WireEvent::Closed {
            reason: "kicked by broker".into(),
        });
        self.schedule_will(client_id.to_string(), &registration);
    }

    /// Number of clients currently subscribed to a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .clients
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .subscriptions
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .contains(topic)
            })
            .count()
    }

    /// Retained payload currently stored for a topic.
    pub fn retained_payload(&self, topic: &str) -> Option<String> {
        self.inner
            .retained
            .get(topic)
            .map(|message| message.payload.clone())
    }

    fn next_stamp(&self) -> u64 {
        let now = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64;
        self.inner
            .stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(last.max(now - 1) + 1)
            })
            .map(|last| last.max(now - 1) + 1)
            .unwrap_or(now)
    }

    fn publish(&self, topic: String, payload: String, retain: bool) {
        let message = Message {
            timestamp_ms: self.next_stamp(),
            topic: topic.clone(),
            payload,
            retain,
        };

        if retain {
            if message.payload.is_empty() {
                self.inner.retained.remove(&topic);
            } else {
                self.inner.retained.insert(topic.clone(), message.clone());
            }
        }

        for entry in self.inner.clients.iter() {
            let subscribed = entry
                .value()
                .subscriptions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains(&topic);
            if subscribed {
                let _ = entry.value().events.send(WireEvent::Message(message.clone()));
            }
        }
    }

    fn schedule_will(&self, client_id: String, registration: &Arc<Registration>) {
        let hub = self.clone();
        let will = registration.will.clone();
        let generation = registration.generation;
        tokio::spawn(async move {
            sleep(will.delay).await;
            // A reconnect under the same client id cancels the testament.
            let reconnected = hub
                .inner
                .clients
                .get(&client_id)
                .is_some_and(|current| current.generation != generation);
            if reconnected {
                debug!(client_id, "last-will cancelled by reconnect");
                return;
            }
            hub.publish(will.topic, will.payload, will.retain);
        });
    }

    fn serve(&self, client_id: String, registration: Arc<Registration>, mut commands: mpsc::UnboundedReceiver<WireCommand>) {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut graceful = false;
            while let Some(command) = commands.recv().await {
                match command {
                    WireCommand::Subscribe { topic } => {
                        registration
                            .subscriptions
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .insert(topic.clone());
                        if let Some(retained) = hub.inner.retained.get(&topic) {
                            let _ = registration
                                .events
                                .send(WireEvent::Message(retained.clone()));
                        }
                    }
                    WireCommand::Unsubscribe { topic } => {
                        registration
                            .subscriptions
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .remove(&topic);
                    }
                    WireCommand::Publish {
                        topic,
                        payload,
                        retain,
                    } => hub.publish(topic, payload, retain),
                    WireCommand::Disconnect => {
                        graceful = true;
                        break;
                    }
                }
            }

            let still_registered = hub
                .inner
                .clients
                .remove_if(&client_id, |_, current| {
                    current.generation == registration.generation
                })
                .is_some();

            if still_registered && !graceful {
                hub.schedule_will(client_id, &registration);
            }
        });
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerWire for InMemoryBroker {
    fn connect(
        &self,
        options: ConnectOptions,
    ) -> BoxFuture<'static, Result<WireLink, TransportError>> {
        let hub = self.clone();
        Box::pin(async move {
            if hub.inner.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Refused("broker unavailable".into()));
            }

            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let registration = Arc::new(Registration {
                generation: hub.inner.generation.fetch_add(1, Ordering::SeqCst),
                subscriptions: std::sync::Mutex::new(HashSet::new()),
                events: event_tx,
                will: options.will.clone(),
            });

            // A reconnect replaces any stale registration for the id.
            hub.inner
                .clients
                .insert(options.client_id.clone(), Arc::clone(&registration));
            hub.serve(options.client_id, registration, command_rx);

            Ok(WireLink {
                commands: command_tx,
                events: event_rx,
            })
        })
    }
}
