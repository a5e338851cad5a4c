//! Persistent bidirectional channel to the processing service
//!
//! A [`Channel`] owns a background driver task that opens a Socket.IO session
//! over a WebSocket, answers heartbeats, dispatches inbound events to their
//! registered queues and writes outbound events. When the connection drops the
//! driver retries a bounded number of times with a fixed delay, then gives up
//! and leaves the channel [`ChannelState::Closed`].

use crate::error::{RelayError, RelayResult};
use crate::protocol::{
    EnginePacket, OpenHandshake, SocketPacket, SocketPacketKind, DEFAULT_NAMESPACE,
    ENGINE_IO_PATH, ENGINE_IO_VERSION,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport used by the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// Full-duplex WebSocket; the only supported transport
    WebSocket,
}

/// Connection options
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Transport to use
    pub transport: TransportMode,
    /// Reconnect automatically after a failure
    pub reconnection: bool,
    /// Reconnection attempts after a failed connect or a dropped connection
    pub reconnection_attempts: u32,
    /// Fixed delay between reconnection attempts
    pub reconnection_delay: Duration,
    /// Deadline for a single connect attempt, handshake included
    pub timeout: Duration,
    /// Send credentials on the upgrade request
    pub with_credentials: bool,
    /// Cookie string sent when `with_credentials` is set
    pub credentials: Option<String>,
    /// Socket.IO namespace
    pub namespace: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            transport: TransportMode::WebSocket,
            reconnection: true,
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_millis(1000),
            timeout: Duration::from_millis(10000),
            with_credentials: true,
            credentials: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl ChannelOptions {
    /// Validate options
    pub fn validate(&self) -> RelayResult<()> {
        if self.timeout.is_zero() {
            return Err(RelayError::InvalidConfiguration {
                field: "channel.timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnection && self.reconnection_delay.is_zero() {
            return Err(RelayError::InvalidConfiguration {
                field: "channel.reconnection_delay".to_string(),
                reason: "must be greater than zero when reconnection is enabled".to_string(),
            });
        }
        if !self.namespace.starts_with('/') {
            return Err(RelayError::InvalidConfiguration {
                field: "channel.namespace".to_string(),
                reason: format!("'{}' must start with '/'", self.namespace),
            });
        }
        Ok(())
    }
}

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    /// First connection attempt in progress
    Connecting,
    /// Session established
    Connected,
    /// Connection lost, waiting for the next attempt
    Disconnected,
    /// Reconnection attempt in progress
    Reconnecting,
    /// Gave up, or closed by the client; no further automatic action
    Closed,
}

impl ChannelState {
    /// Whether sends are currently accepted
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelState::Connected)
    }
}

/// Why a connected session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client called [`Channel::disconnect`]
    ClientDisconnect,
    /// The server disconnected the namespace
    ServerDisconnect,
    /// The transport closed
    TransportClose,
    /// The transport failed
    TransportError(String),
    /// No heartbeat within the negotiated deadline
    PingTimeout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientDisconnect => write!(f, "io client disconnect"),
            DisconnectReason::ServerDisconnect => write!(f, "io server disconnect"),
            DisconnectReason::TransportClose => write!(f, "transport close"),
            DisconnectReason::TransportError(reason) => write!(f, "transport error: {}", reason),
            DisconnectReason::PingTimeout => write!(f, "ping timeout"),
        }
    }
}

/// Channel lifecycle events
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Session established
    Connected {
        /// Engine.IO session id
        sid: String,
    },
    /// A connect attempt failed
    ConnectError {
        /// What went wrong
        error: String,
    },
    /// A connected session ended
    Disconnected {
        /// Why it ended
        reason: DisconnectReason,
    },
    /// A reconnection attempt is scheduled
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// The channel will not reconnect again
    Closed,
}

enum Command {
    Emit(String),
    Disconnect,
}

struct Shared {
    endpoint: Url,
    socket_url: String,
    options: ChannelOptions,
    state: watch::Sender<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
    handlers: DashMap<String, mpsc::UnboundedSender<Value>>,
}

impl Shared {
    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Channel state {:?} -> {:?}", previous, state);
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn dispatch(&self, packet: &SocketPacket) {
        if packet.namespace != self.options.namespace {
            debug!("Ignoring packet for namespace {}", packet.namespace);
            return;
        }
        let Some((event, payload)) = packet.event_parts() else {
            warn!("Dropping event packet without a name");
            return;
        };

        let delivered = match self.handlers.get(event) {
            Some(handler) => handler.send(payload.clone()).is_ok(),
            None => {
                debug!("No handler registered for '{}'", event);
                return;
            }
        };
        if !delivered {
            debug!("Handler for '{}' went away", event);
            self.handlers.remove(event);
        }
    }
}

/// Handle to the persistent channel; cheap to clone
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    pending: Arc<Mutex<Option<mpsc::UnboundedReceiver<Command>>>>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.shared.endpoint.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl Channel {
    /// Create a channel without connecting
    ///
    /// Register handlers and subscribe to events, then call [`Channel::start`].
    pub fn new(endpoint: &str, options: ChannelOptions) -> RelayResult<Self> {
        options.validate()?;
        let endpoint = Url::parse(endpoint).map_err(|e| RelayError::InvalidConfiguration {
            field: "endpoint".to_string(),
            reason: format!("'{}': {}", endpoint, e),
        })?;
        let socket_url = socket_url(&endpoint)?;

        let (state, _) = watch::channel(ChannelState::Connecting);
        let (events, _) = broadcast::channel(64);
        let (commands, pending) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared {
                endpoint,
                socket_url,
                options,
                state,
                events,
                handlers: DashMap::new(),
            }),
            commands,
            pending: Arc::new(Mutex::new(Some(pending))),
            driver: Arc::new(Mutex::new(None)),
        })
    }

    /// Create a channel and start connecting
    pub fn connect(endpoint: &str, options: ChannelOptions) -> RelayResult<Self> {
        let channel = Self::new(endpoint, options)?;
        channel.start()?;
        Ok(channel)
    }

    /// Spawn the driver task
    pub fn start(&self) -> RelayResult<()> {
        let commands = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| RelayError::InvalidState {
                expected: "unstarted channel".to_string(),
                actual: format!("{:?}", self.state()),
            })?;

        info!("Connecting to {}", self.shared.endpoint);
        let handle = tokio::spawn(drive(self.shared.clone(), commands));
        *self.driver.lock() = Some(handle);
        Ok(())
    }

    /// Endpoint this channel connects to
    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    /// Options in effect
    pub fn options(&self) -> &ChannelOptions {
        &self.shared.options
    }

    /// Current state
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Whether sends are currently accepted
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch state changes
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    /// Register the queue for a named inbound event
    ///
    /// At most one queue exists per event name; registering again replaces
    /// the previous one, whose receiver then sees the end of the stream.
    pub fn on_message(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.shared.handlers.insert(event.to_string(), tx).is_some() {
            debug!("Replaced handler for '{}'", event);
        }
        rx
    }

    /// Emit a named event
    ///
    /// Returns `false` without doing anything when the channel is not
    /// connected; the payload is dropped.
    pub fn send(&self, event: &str, payload: Value) -> bool {
        if !self.is_connected() {
            debug!("Dropping '{}' while {:?}", event, self.state());
            return false;
        }
        let packet = SocketPacket::event(&self.shared.options.namespace, event, payload);
        self.commands
            .send(Command::Emit(EnginePacket::Message(packet).encode()))
            .is_ok()
    }

    /// Close the channel and stop reconnecting
    pub fn disconnect(&self) {
        if self.state() == ChannelState::Closed {
            return;
        }
        if self.pending.lock().take().is_some() {
            // Never started; nothing to tear down.
            self.shared.set_state(ChannelState::Closed);
            self.shared.emit(ChannelEvent::Closed);
            return;
        }
        info!("Disconnecting from {}", self.shared.endpoint);
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Wait until the channel reaches a state matching `predicate`
    pub async fn wait_for_state<F>(&self, predicate: F, limit: Duration) -> RelayResult<ChannelState>
    where
        F: Fn(ChannelState) -> bool,
    {
        let mut changes = self.state_changes();
        let wait = changes.wait_for(|state| predicate(*state));
        let waited = tokio::time::timeout(limit, wait).await;
        let result = match waited {
            Ok(Ok(state)) => Ok(*state),
            Ok(Err(_)) => Err(RelayError::ChannelClosed),
            Err(_) => Err(RelayError::Timeout {
                operation: "waiting for channel state".to_string(),
                duration: limit,
            }),
        };
        result
    }

    /// Wait until the channel is closed
    pub async fn closed(&self) {
        let _ = self
            .wait_for_state(|state| state == ChannelState::Closed, Duration::MAX)
            .await;
    }
}

/// `http://host:port` becomes `ws://host:port/socket.io/?EIO=4&transport=websocket`
fn socket_url(endpoint: &Url) -> RelayResult<String> {
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RelayError::InvalidConfiguration {
                field: "endpoint".to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    };
    let mut url = endpoint.clone();
    url.set_scheme(scheme)
        .map_err(|_| RelayError::InvalidConfiguration {
            field: "endpoint".to_string(),
            reason: format!("cannot use scheme '{}' for {}", scheme, endpoint),
        })?;
    url.set_path(ENGINE_IO_PATH);
    url.set_query(Some(&format!(
        "EIO={}&transport=websocket",
        ENGINE_IO_VERSION
    )));
    Ok(url.to_string())
}

struct LiveSession {
    ws: WsStream,
    handshake: OpenHandshake,
}

async fn drive(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let options = shared.options.clone();
    let mut attempt = 0u32;

    loop {
        shared.set_state(if attempt == 0 {
            ChannelState::Connecting
        } else {
            ChannelState::Reconnecting
        });

        let opened = tokio::time::timeout(options.timeout, open_session(&shared)).await;
        let session = match opened {
            Ok(Ok(session)) => Some(session),
            Ok(Err(e)) => {
                warn!("Connect attempt to {} failed: {}", shared.endpoint, e);
                shared.emit(ChannelEvent::ConnectError {
                    error: e.to_string(),
                });
                None
            }
            Err(_) => {
                warn!(
                    "Connect attempt to {} timed out after {:?}",
                    shared.endpoint, options.timeout
                );
                shared.emit(ChannelEvent::ConnectError {
                    error: format!("timed out after {:?}", options.timeout),
                });
                None
            }
        };

        if let Some(session) = session {
            attempt = 0;
            let sid = session.handshake.sid.clone();
            shared.set_state(ChannelState::Connected);
            info!("Connected to {} (sid {})", shared.endpoint, sid);
            shared.emit(ChannelEvent::Connected { sid });

            let reason = run_session(&shared, session, &mut commands).await;
            if reason == DisconnectReason::ClientDisconnect {
                shared.set_state(ChannelState::Closed);
                shared.emit(ChannelEvent::Disconnected { reason });
                shared.emit(ChannelEvent::Closed);
                return;
            }

            warn!("Disconnected from {}: {:?}", shared.endpoint, reason);
            shared.set_state(ChannelState::Disconnected);
            shared.emit(ChannelEvent::Disconnected { reason });
        }

        if !options.reconnection || attempt >= options.reconnection_attempts {
            warn!(
                "Giving up on {} after {} reconnection attempts",
                shared.endpoint, attempt
            );
            shared.set_state(ChannelState::Closed);
            shared.emit(ChannelEvent::Closed);
            return;
        }

        attempt += 1;
        shared.set_state(ChannelState::Disconnected);
        shared.emit(ChannelEvent::Reconnecting {
            attempt,
            delay: options.reconnection_delay,
        });
        debug!(
            "Reconnection attempt {}/{} in {:?}",
            attempt, options.reconnection_attempts, options.reconnection_delay
        );

        let wake = tokio::time::sleep(options.reconnection_delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => break,
                command = commands.recv() => match command {
                    // Sends are refused while disconnected; anything queued is stale.
                    Some(Command::Emit(_)) => continue,
                    Some(Command::Disconnect) | None => {
                        shared.set_state(ChannelState::Closed);
                        shared.emit(ChannelEvent::Closed);
                        return;
                    }
                },
            }
        }
    }
}

async fn open_session(shared: &Shared) -> RelayResult<LiveSession> {
    let connection_error = |reason: String| RelayError::Connection {
        endpoint: shared.endpoint.to_string(),
        reason,
        retry_in: None,
    };

    let mut request = shared
        .socket_url
        .as_str()
        .into_client_request()
        .map_err(|e| connection_error(e.to_string()))?;
    if shared.options.with_credentials {
        if let Some(cookie) = &shared.options.credentials {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| connection_error(format!("invalid credentials: {}", e)))?;
            request.headers_mut().insert(COOKIE, value);
        }
    }

    let (mut ws, _) = connect_async(request)
        .await
        .map_err(|e| connection_error(e.to_string()))?;

    let handshake = match next_packet(&mut ws).await? {
        EnginePacket::Open(handshake) => handshake,
        other => {
            return Err(RelayError::Protocol {
                message: format!("expected open packet, got {:?}", other),
            })
        }
    };
    debug!(
        "Engine session {} (ping every {} ms)",
        handshake.sid, handshake.ping_interval
    );

    let namespace = &shared.options.namespace;
    send_packet(&mut ws, EnginePacket::Message(SocketPacket::connect(namespace))).await?;

    loop {
        match next_packet(&mut ws).await? {
            EnginePacket::Message(packet)
                if packet.kind == SocketPacketKind::Connect && &packet.namespace == namespace =>
            {
                break;
            }
            EnginePacket::Message(packet) if packet.kind == SocketPacketKind::ConnectError => {
                let reason = packet
                    .data
                    .as_ref()
                    .and_then(|data| data.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("namespace connection refused")
                    .to_string();
                return Err(connection_error(reason));
            }
            EnginePacket::Ping => send_packet(&mut ws, EnginePacket::Pong).await?,
            EnginePacket::Close => {
                return Err(connection_error("closed during handshake".to_string()))
            }
            _ => {}
        }
    }

    Ok(LiveSession { ws, handshake })
}

async fn next_packet(ws: &mut WsStream) -> RelayResult<EnginePacket> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(RelayError::Transport {
                    reason: "connection closed during handshake".to_string(),
                })
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RelayError::Transport {
                    reason: e.to_string(),
                })
            }
        }
    }
}

async fn send_packet(ws: &mut WsStream, packet: EnginePacket) -> RelayResult<()> {
    ws.send(Message::Text(packet.encode()))
        .await
        .map_err(|e| RelayError::Transport {
            reason: e.to_string(),
        })
}

async fn run_session(
    shared: &Shared,
    session: LiveSession,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> DisconnectReason {
    let deadline = session.handshake.heartbeat_deadline();
    let (mut sink, mut stream) = session.ws.split();
    let heartbeat = tokio::time::sleep(deadline);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text) {
                    Ok(EnginePacket::Ping) => {
                        heartbeat.as_mut().reset(Instant::now() + deadline);
                        if let Err(e) = sink.send(Message::Text(EnginePacket::Pong.encode())).await {
                            return DisconnectReason::TransportError(e.to_string());
                        }
                    }
                    Ok(EnginePacket::Message(packet)) => match packet.kind {
                        SocketPacketKind::Event => shared.dispatch(&packet),
                        SocketPacketKind::Disconnect if packet.namespace == shared.options.namespace => {
                            return DisconnectReason::ServerDisconnect;
                        }
                        other => debug!("Ignoring {:?} packet", other),
                    },
                    Ok(EnginePacket::Close) => return DisconnectReason::TransportClose,
                    Ok(_) => {}
                    Err(e) => warn!("Dropping malformed packet: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return DisconnectReason::TransportClose,
                Some(Ok(_)) => {}
                Some(Err(e)) => return DisconnectReason::TransportError(e.to_string()),
            },
            command = commands.recv() => match command {
                Some(Command::Emit(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        return DisconnectReason::TransportError(e.to_string());
                    }
                }
                Some(Command::Disconnect) | None => {
                    let goodbye = EnginePacket::Message(SocketPacket::disconnect(&shared.options.namespace));
                    let _ = sink.send(Message::Text(goodbye.encode())).await;
                    let _ = sink.close().await;
                    return DisconnectReason::ClientDisconnect;
                }
            },
            _ = &mut heartbeat => return DisconnectReason::PingTimeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ChannelOptions::default();
        assert_eq!(options.transport, TransportMode::WebSocket);
        assert_eq!(options.reconnection_attempts, 5);
        assert_eq!(options.reconnection_delay, Duration::from_millis(1000));
        assert_eq!(options.timeout, Duration::from_millis(10000));
        assert!(options.with_credentials);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        let options = ChannelOptions {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = ChannelOptions {
            namespace: "slides".to_string(),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_socket_url() {
        let url = socket_url(&Url::parse("http://localhost:5000").unwrap()).unwrap();
        assert_eq!(url, "ws://localhost:5000/socket.io/?EIO=4&transport=websocket");

        let url = socket_url(&Url::parse("https://relay.example.com/app").unwrap()).unwrap();
        assert_eq!(url, "wss://relay.example.com/socket.io/?EIO=4&transport=websocket");

        assert!(socket_url(&Url::parse("ftp://localhost").unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_dropped() {
        let channel = Channel::new("http://127.0.0.1:9", ChannelOptions::default()).unwrap();
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert!(!channel.send("process_frame", Value::String("x".to_string())));
    }

    #[tokio::test]
    async fn test_disconnect_unstarted_channel() {
        let channel = Channel::new("http://127.0.0.1:9", ChannelOptions::default()).unwrap();
        channel.disconnect();
        assert_eq!(channel.state(), ChannelState::Closed);
        // Idempotent, and a closed channel cannot be started.
        channel.disconnect();
        assert!(channel.start().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_times_out() {
        let channel = Channel::new("http://127.0.0.1:9", ChannelOptions::default()).unwrap();
        let error = channel
            .wait_for_state(|state| state.is_connected(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_wait_for_state_sees_current_state() {
        let channel = Channel::new("http://127.0.0.1:9", ChannelOptions::default()).unwrap();
        channel.disconnect();
        let state = channel
            .wait_for_state(|state| state == ChannelState::Closed, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(state, ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_on_message_replaces_previous_handler() {
        let channel = Channel::new("http://127.0.0.1:9", ChannelOptions::default()).unwrap();
        let mut first = channel.on_message("processed_frame");
        let _second = channel.on_message("processed_frame");
        assert!(first.recv().await.is_none());
    }
}
