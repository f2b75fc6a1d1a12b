//! Socket.IO signaling channel over a single websocket
//!
//! [`SignalingClient::connect`] performs the Engine.IO and namespace
//! handshakes within the connect timeout, then hands the socket to a
//! background task. That task answers server pings, forwards named events
//! as [`SignalEvent`]s, writes outbound emits, and reconnects with bounded
//! backoff when the link drops. Running out of reconnect attempts is reported
//! as [`SignalEvent::Failed`] and ends the channel.

pub mod packet;
pub mod reconnect;

use crate::config::SignalingConfig;
use crate::errors::{ConnectError, SignalingError};
use futures_util::{SinkExt, StreamExt};
use packet::{connect_error_reason, EnginePacket, Handshake, SocketPacket};
use reconnect::ReconnectPolicy;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the orchestrator sees from the signaling server
#[derive(Debug)]
pub enum SignalEvent {
    Connected,
    Disconnected(String),
    Message { name: String, payload: Value },
    /// Reconnection gave up; no further events follow
    Failed(ConnectError),
}

/// Outbound half of the signaling channel
pub trait SignalSink {
    fn emit(&self, event: &str, payload: Value) -> Result<(), SignalingError>;

    /// Best-effort disconnect; never fails
    fn disconnect(&self);
}

#[derive(Debug, Clone)]
pub struct SignalingOptions {
    /// `http(s)://host:port`
    pub url: Url,
    pub namespace: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SignalingOptions {
    /// Target `host` on the configured port. A host that already carries a
    /// scheme is used as given.
    pub fn new(host: &str, config: &SignalingConfig) -> Result<Self, ConnectError> {
        let raw = if host.contains("://") {
            host.to_string()
        } else {
            let scheme = if config.secure { "https" } else { "http" };
            format!("{}://{}:{}", scheme, host, config.port)
        };
        let url = Url::parse(&raw).map_err(|e| ConnectError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if url.host_str().is_none() {
            return Err(ConnectError::InvalidUrl(format!("{}: missing host", raw)));
        }

        Ok(Self {
            url,
            namespace: config.namespace.clone(),
            connect_timeout: config.connect_timeout(),
            reconnect: ReconnectPolicy::from_config(config),
        })
    }

    /// Websocket-only Engine.IO endpoint for the server url
    pub fn websocket_url(&self) -> Result<Url, ConnectError> {
        let mut ws = self.url.clone();
        let scheme = match self.url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        ws.set_scheme(scheme)
            .map_err(|_| ConnectError::InvalidUrl("invalid websocket scheme".into()))?;
        ws.set_path("/socket.io/");
        ws.set_query(Some("EIO=4&transport=websocket"));
        ws.set_fragment(None);
        Ok(ws)
    }
}

enum Command {
    Emit { name: String, payload: Value },
    Disconnect,
}

/// Handle to a connected signaling channel. Cheap to clone.
#[derive(Clone)]
pub struct SignalingClient {
    commands: mpsc::UnboundedSender<Command>,
    finished: watch::Receiver<bool>,
}

impl SignalingClient {
    /// Connect once, bounded by the connect timeout. There is no retry here;
    /// reconnection only covers links that drop after this succeeds.
    pub async fn connect(
        options: SignalingOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalEvent>), ConnectError> {
        let link = open_link_within(&options).await?;
        log::info!(
            "Connected to signaling server {} (sid {})",
            options.url,
            link.handshake.sid
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = watch::channel(false);

        let _ = events_tx.send(SignalEvent::Connected);
        tokio::spawn(async move {
            run_channel(options, link, commands_rx, events_tx).await;
            let _ = finished_tx.send(true);
        });

        Ok((
            Self {
                commands: commands_tx,
                finished: finished_rx,
            },
            events_rx,
        ))
    }

    /// Resolves once the background task has exited
    pub async fn closed(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.finished.borrow() || self.commands.is_closed()
    }
}

impl SignalSink for SignalingClient {
    fn emit(&self, event: &str, payload: Value) -> Result<(), SignalingError> {
        log::debug!("Emitting signaling event '{}'", event);
        self.commands
            .send(Command::Emit {
                name: event.to_string(),
                payload,
            })
            .map_err(|_| SignalingError::Closed)
    }

    fn disconnect(&self) {
        if self.commands.send(Command::Disconnect).is_err() {
            log::debug!("Signaling channel already closed");
        }
    }
}

struct Link {
    ws: WsStream,
    handshake: Handshake,
}

async fn open_link_within(options: &SignalingOptions) -> Result<Link, ConnectError> {
    tokio::time::timeout(options.connect_timeout, open_link(options))
        .await
        .map_err(|_| ConnectError::Timeout(options.connect_timeout))?
}

async fn open_link(options: &SignalingOptions) -> Result<Link, ConnectError> {
    let url = options.websocket_url()?;
    log::debug!("Opening signaling websocket {}", url);
    let (mut ws, _) = connect_async(url.as_str()).await?;

    let handshake = match next_engine_packet(&mut ws).await? {
        EnginePacket::Open(handshake) => handshake,
        other => {
            return Err(ConnectError::Handshake(format!(
                "expected open packet, got {:?}",
                other
            )))
        }
    };
    if !handshake.upgrades.is_empty() {
        log::trace!("Ignoring offered upgrades {:?}", handshake.upgrades);
    }

    send_socket_packet(&mut ws, &SocketPacket::connect(&options.namespace)).await?;

    loop {
        match next_engine_packet(&mut ws).await? {
            EnginePacket::Ping(data) => {
                ws.send(Message::Text(EnginePacket::Pong(data).encode()))
                    .await?;
            }
            EnginePacket::Message(data) => {
                let packet = SocketPacket::decode(&data)
                    .map_err(|e| ConnectError::Handshake(e.to_string()))?;
                match packet {
                    SocketPacket::Connect { namespace, .. } if namespace == options.namespace => {
                        break
                    }
                    SocketPacket::ConnectError { namespace, data }
                        if namespace == options.namespace =>
                    {
                        return Err(ConnectError::Rejected {
                            namespace,
                            reason: connect_error_reason(&data),
                        })
                    }
                    other => log::debug!("Ignoring {:?} before namespace connect", other),
                }
            }
            EnginePacket::Close => {
                return Err(ConnectError::Handshake(
                    "server closed the session during handshake".into(),
                ))
            }
            _ => {}
        }
    }

    Ok(Link { ws, handshake })
}

async fn next_engine_packet(ws: &mut WsStream) -> Result<EnginePacket, ConnectError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return EnginePacket::decode(&text)
                    .map_err(|e| ConnectError::Handshake(e.to_string()))
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(ConnectError::Transport("websocket closed".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn send_socket_packet(ws: &mut WsStream, packet: &SocketPacket) -> Result<(), ConnectError> {
    let frame = EnginePacket::Message(packet.encode()).encode();
    ws.send(Message::Text(frame)).await?;
    Ok(())
}

enum LinkOutcome {
    /// Disconnect requested, or every client handle dropped
    Closed,
    Lost(String),
}

async fn run_channel(
    options: SignalingOptions,
    mut link: Link,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SignalEvent>,
) {
    loop {
        match drive_link(&options.namespace, &mut link, &mut commands, &events).await {
            LinkOutcome::Closed => {
                log::info!("Signaling channel closed");
                break;
            }
            LinkOutcome::Lost(reason) => {
                log::warn!("Signaling connection lost: {}", reason);
                let _ = events.send(SignalEvent::Disconnected(reason));

                match reconnect::retry(&options.reconnect, |_| open_link_within(&options)).await {
                    Ok(new_link) => {
                        log::info!("Signaling reconnected (sid {})", new_link.handshake.sid);
                        link = new_link;
                        let _ = events.send(SignalEvent::Connected);
                    }
                    Err(e) => {
                        log::error!("Signaling reconnection failed: {}", e);
                        let _ = events.send(SignalEvent::Failed(e));
                        break;
                    }
                }
            }
        }
    }
}

async fn drive_link(
    namespace: &str,
    link: &mut Link,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<SignalEvent>,
) -> LinkOutcome {
    let deadline = link.handshake.ping_deadline();
    let ping_timer = tokio::time::sleep(deadline);
    tokio::pin!(ping_timer);

    loop {
        tokio::select! {
            frame = link.ws.next() => match frame {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text) {
                    Ok(EnginePacket::Ping(data)) => {
                        ping_timer.as_mut().reset(tokio::time::Instant::now() + deadline);
                        let pong = EnginePacket::Pong(data).encode();
                        if let Err(e) = link.ws.send(Message::Text(pong)).await {
                            return LinkOutcome::Lost(e.to_string());
                        }
                    }
                    Ok(EnginePacket::Message(data)) => match SocketPacket::decode(&data) {
                        Ok(SocketPacket::Event { namespace: ns, name, payload, .. }) if ns == namespace => {
                            log::debug!("Received signaling event '{}'", name);
                            let _ = events.send(SignalEvent::Message { name, payload });
                        }
                        Ok(SocketPacket::Disconnect { namespace: ns }) if ns == namespace => {
                            return LinkOutcome::Lost("server disconnected the namespace".into());
                        }
                        Ok(other) => log::debug!("Ignoring signaling packet {:?}", other),
                        Err(e) => log::warn!("Dropping undecodable signaling packet: {}", e),
                    },
                    Ok(EnginePacket::Close) => return LinkOutcome::Lost("server closed the session".into()),
                    Ok(_) => {}
                    Err(e) => log::warn!("Dropping undecodable signaling frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    return LinkOutcome::Lost(format!("websocket closed: {:?}", frame));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkOutcome::Lost(e.to_string()),
                None => return LinkOutcome::Lost("websocket stream ended".into()),
            },
            command = commands.recv() => match command {
                Some(Command::Emit { name, payload }) => {
                    let packet = SocketPacket::event(namespace, &name, payload);
                    if let Err(e) = send_socket_packet(&mut link.ws, &packet).await {
                        log::warn!("Failed to emit '{}': {}", name, e);
                        return LinkOutcome::Lost(e.to_string());
                    }
                }
                Some(Command::Disconnect) | None => {
                    let packet = SocketPacket::Disconnect { namespace: namespace.to_string() };
                    if let Err(e) = send_socket_packet(&mut link.ws, &packet).await {
                        log::debug!("Namespace disconnect not delivered: {}", e);
                    }
                    if let Err(e) = link.ws.close(None).await {
                        log::debug!("Websocket close not delivered: {}", e);
                    }
                    return LinkOutcome::Closed;
                }
            },
            _ = &mut ping_timer => {
                return LinkOutcome::Lost(format!("no ping from server within {:?}", deadline));
            }
        }
    }
}
