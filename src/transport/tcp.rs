//! TCP wire speaking the platform broker's newline-delimited JSON framing.
//!
//! One frame per line. The client opens with a `hello` frame carrying its id
//! and last-will; the broker answers with `message` frames and a terminal
//! `closed` frame. Everything above this codec lives in the client layer.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::broker::{
    BrokerWire, ConnectOptions, Message, TransportError, WireCommand, WireEvent, WireLink,
};

#[derive(Debug, Serialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Hello {
        client_id: &'a str,
        will_topic: &'a str,
        will_payload: &'a str,
        will_retain: bool,
        will_delay_ms: u64,
    },
    Subscribe {
        topic: &'a str,
    },
    Unsubscribe {
        topic: &'a str,
    },
    Publish {
        topic: &'a str,
        payload: &'a str,
        retain: bool,
    },
    Disconnect,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum ServerFrame {
    Message {
        topic: String,
        payload: String,
        #[serde(default)]
        retain: bool,
        timestamp_ms: u64,
    },
    Closed {
        #[serde(default)]
        reason: String,
    },
}

/// Wire connector for the platform broker endpoint.
pub struct TcpWire {
    addr: String,
}

impl TcpWire {
    /// Wire targeting `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl BrokerWire for TcpWire {
    fn connect(
        &self,
        options: ConnectOptions,
    ) -> BoxFuture<'static, Result<WireLink, TransportError>> {
        let addr = self.addr.clone();
        Box::pin(async move {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| TransportError::Io {
                    context: format!("connecting to {addr}"),
                    source,
                })?;
            let (read_half, mut write_half) = stream.into_split();

            let hello = encode(&ClientFrame::Hello {
                client_id: &options.client_id,
                will_topic: &options.will.topic,
                will_payload: &options.will.payload,
                will_retain: options.will.retain,
                will_delay_ms: duration_ms(options.will.delay),
            });
            write_half
                .write_all(hello.as_bytes())
                .await
                .map_err(|source| TransportError::Io {
                    context: "sending hello frame".into(),
                    source,
                })?;

            let (command_tx, mut command_rx) = mpsc::unbounded_channel::<WireCommand>();
            let (event_tx, event_rx) = mpsc::unbounded_channel::<WireEvent>();

            // Writer half: drain commands until disconnect or link drop.
            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    let frame = match &command {
                        WireCommand::Subscribe { topic } => encode(&ClientFrame::Subscribe { topic }),
                        WireCommand::Unsubscribe { topic } => {
                            encode(&ClientFrame::Unsubscribe { topic })
                        }
                        WireCommand::Publish {
                            topic,
                            payload,
                            retain,
                        } => encode(&ClientFrame::Publish {
                            topic,
                            payload,
                            retain: *retain,
                        }),
                        WireCommand::Disconnect => encode(&ClientFrame::Disconnect),
                    };
                    if let Err(err) = write_half.write_all(frame.as_bytes()).await {
                        warn!(error = %err, "broker write failed");
                        break;
                    }
                    if matches!(command, WireCommand::Disconnect) {
                        break;
                    }
                }
            });

            // Reader half: decode frames into events until the peer goes away.
            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<ServerFrame>(line) {
                                Ok(ServerFrame::Message {
                                    topic,
                                    payload,
                                    retain,
                                    timestamp_ms,
                                }) => {
                                    let delivered = event_tx.send(WireEvent::Message(Message {
                                        topic,
                                        payload,
                                        retain,
                                        timestamp_ms,
                                    }));
                                    if delivered.is_err() {
                                        break;
                                    }
                                }
                                Ok(ServerFrame::Closed { reason }) => {
                                    let _ = event_tx.send(WireEvent::Closed { reason });
                                    break;
                                }
                                Err(err) => {
                                    debug!(error = %err, line, "skipping undecodable frame");
                                }
                            }
                        }
                        Ok(None) => {
                            let _ = event_tx.send(WireEvent::Closed {
                                reason: "connection closed by peer".into(),
                            });
                            break;
                        }
                        Err(err) => {
                            let _ = event_tx.send(WireEvent::Closed {
                                reason: format!("read failure: {err}"),
                            });
                            break;
                        }
                    }
                }
            });

            Ok(WireLink {
                commands: command_tx,
                events: event_rx,
            })
        })
    }
}

fn encode<T: Serialize>(frame: &T) -> String {
    let mut line = serde_json::to_string(frame).unwrap_or_else(|_| "{}".into());
    line.push('\n');
    line
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn speaks_line_delimited_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            let hello = lines.next_line().await.unwrap().unwrap();
            assert!(hello.contains("\"frame\":\"hello\""));
            assert!(hello.contains("station-1"));

            let subscribe = lines.next_line().await.unwrap().unwrap();
            assert!(subscribe.contains("\"frame\":\"subscribe\""));

            write_half
                .write_all(
                    b"{\"frame\":\"message\",\"topic\":\"cmd\",\"payload\":\"race-1\",\"timestamp_ms\":42}\n",
                )
                .await
                .unwrap();
        });

        let wire = TcpWire::new(addr.to_string());
        let options = ConnectOptions {
            client_id: "station-1".into(),
            will: crate::transport::broker::LastWill {
                topic: "state/station-1".into(),
                payload: "offline".into(),
                retain: true,
                delay: Duration::from_secs(5),
            },
        };
        let mut link = wire.connect(options).await.unwrap();
        link.commands
            .send(WireCommand::Subscribe { topic: "cmd".into() })
            .unwrap();

        match link.events.recv().await {
            Some(WireEvent::Message(message)) => {
                assert_eq!(message.topic, "cmd");
                assert_eq!(message.payload, "race-1");
                assert_eq!(message.timestamp_ms, 42);
            }
            other => panic!("expected message, got {other:?}"),
        }

        server.await.unwrap();
    }
}
