//! Socket.IO wire format
//!
//! The processing service speaks Socket.IO v5 on top of Engine.IO v4. Only the
//! WebSocket transport and text framing are implemented:
//!
//! - an Engine.IO packet is a single type digit followed by its payload
//! - an Engine.IO `message` packet carries a Socket.IO packet: a type digit, an
//!   optional `/namespace,` prefix, an optional numeric ack id and a JSON body
//!
//! `42["process_frame","data:image/jpeg;base64,..."]` is therefore an engine
//! message (4) holding a socket event (2) on the default namespace.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;

/// Event carrying an outbound camera frame
pub const PROCESS_FRAME_EVENT: &str = "process_frame";
/// Event carrying a processed frame back from the service
pub const PROCESSED_FRAME_EVENT: &str = "processed_frame";
/// Event the service emits when it failed to process a frame
pub const SERVICE_ERROR_EVENT: &str = "error";

/// Default namespace
pub const DEFAULT_NAMESPACE: &str = "/";
/// Engine.IO protocol revision spoken by the channel
pub const ENGINE_IO_VERSION: u8 = 4;
/// Engine.IO mount path on the service
pub const ENGINE_IO_PATH: &str = "/socket.io/";

/// Handshake data sent by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id
    pub sid: String,
    /// Transports the server is willing to upgrade to
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds
    pub ping_interval: u64,
    /// Grace period after a missed ping, in milliseconds
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// How long the client may go without a server ping before the connection is lost
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Socket.IO packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketKind {
    /// Namespace connect (client request or server acknowledgement)
    Connect,
    /// Namespace disconnect
    Disconnect,
    /// Named event
    Event,
    /// Acknowledgement of an event
    Ack,
    /// Namespace connection refused
    ConnectError,
    /// Event with binary attachments
    BinaryEvent,
    /// Acknowledgement with binary attachments
    BinaryAck,
}

impl SocketPacketKind {
    fn code(self) -> char {
        match self {
            SocketPacketKind::Connect => '0',
            SocketPacketKind::Disconnect => '1',
            SocketPacketKind::Event => '2',
            SocketPacketKind::Ack => '3',
            SocketPacketKind::ConnectError => '4',
            SocketPacketKind::BinaryEvent => '5',
            SocketPacketKind::BinaryAck => '6',
        }
    }

    fn from_code(code: char) -> RelayResult<Self> {
        match code {
            '0' => Ok(SocketPacketKind::Connect),
            '1' => Ok(SocketPacketKind::Disconnect),
            '2' => Ok(SocketPacketKind::Event),
            '3' => Ok(SocketPacketKind::Ack),
            '4' => Ok(SocketPacketKind::ConnectError),
            '5' => Ok(SocketPacketKind::BinaryEvent),
            '6' => Ok(SocketPacketKind::BinaryAck),
            other => Err(RelayError::Protocol {
                message: format!("unknown socket packet type '{}'", other),
            }),
        }
    }
}

/// Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    /// Packet type
    pub kind: SocketPacketKind,
    /// Namespace, `/` by default
    pub namespace: String,
    /// Acknowledgement id, if the sender expects one
    pub ack_id: Option<u64>,
    /// JSON body
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Namespace connect request
    pub fn connect(namespace: &str) -> Self {
        Self {
            kind: SocketPacketKind::Connect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: None,
        }
    }

    /// Namespace disconnect
    pub fn disconnect(namespace: &str) -> Self {
        Self {
            kind: SocketPacketKind::Disconnect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: None,
        }
    }

    /// Named event with a single payload argument
    pub fn event(namespace: &str, event: &str, payload: Value) -> Self {
        Self {
            kind: SocketPacketKind::Event,
            namespace: namespace.to_string(),
            ack_id: None,
            data: Some(Value::Array(vec![Value::String(event.to_string()), payload])),
        }
    }

    /// Event name and first argument, if this is an event packet
    pub fn event_parts(&self) -> Option<(&str, &Value)> {
        if self.kind != SocketPacketKind::Event {
            return None;
        }
        let args = self.data.as_ref()?.as_array()?;
        let name = args.first()?.as_str()?;
        Some((name, args.get(1).unwrap_or(&Value::Null)))
    }

    fn encode_into(&self, out: &mut String) {
        out.push(self.kind.code());
        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(ack_id) = self.ack_id {
            let _ = write!(out, "{}", ack_id);
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
    }

    fn decode(text: &str) -> RelayResult<Self> {
        let mut chars = text.chars();
        let kind = match chars.next() {
            Some(code) => SocketPacketKind::from_code(code)?,
            None => {
                return Err(RelayError::Protocol {
                    message: "empty socket packet".to_string(),
                })
            }
        };
        if matches!(
            kind,
            SocketPacketKind::BinaryEvent | SocketPacketKind::BinaryAck
        ) {
            return Err(RelayError::Protocol {
                message: "binary attachments are not supported".to_string(),
            });
        }

        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(end) => {
                    let namespace = &rest[..end];
                    rest = &rest[end + 1..];
                    namespace.to_string()
                }
                None => {
                    let namespace = rest.to_string();
                    rest = "";
                    namespace
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| RelayError::Protocol {
                    message: format!("invalid ack id: {}", e),
                })?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest).map_err(|e| RelayError::Protocol {
                    message: format!("invalid packet body: {}", e),
                })?,
            )
        };

        Ok(Self {
            kind,
            namespace,
            ack_id,
            data,
        })
    }
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session opened by the server
    Open(OpenHandshake),
    /// Transport close
    Close,
    /// Heartbeat probe from the server
    Ping,
    /// Heartbeat reply
    Pong,
    /// Socket.IO payload
    Message(SocketPacket),
    /// Transport upgrade
    Upgrade,
    /// No-op
    Noop,
}

impl EnginePacket {
    /// Encode to a WebSocket text frame
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                // Only servers send `open`; encoded for the test harness.
                format!(
                    "0{}",
                    serde_json::to_string(handshake).unwrap_or_else(|_| "{}".to_string())
                )
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(packet) => {
                let mut out = String::from("4");
                packet.encode_into(&mut out);
                out
            }
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    /// Decode a WebSocket text frame
    pub fn decode(text: &str) -> RelayResult<Self> {
        let mut chars = text.chars();
        let code = chars.next().ok_or_else(|| RelayError::Protocol {
            message: "empty engine packet".to_string(),
        })?;
        let body = chars.as_str();

        match code {
            '0' => {
                let handshake =
                    serde_json::from_str(body).map_err(|e| RelayError::Protocol {
                        message: format!("invalid open handshake: {}", e),
                    })?;
                Ok(EnginePacket::Open(handshake))
            }
            '1' => Ok(EnginePacket::Close),
            // Probe payloads ("2probe") only occur during transport upgrades.
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(body)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(RelayError::Protocol {
                message: format!("unknown engine packet type '{}'", other),
            }),
        }
    }

    /// Encode an event on the default namespace
    pub fn event(event: &str, payload: Value) -> String {
        EnginePacket::Message(SocketPacket::event(DEFAULT_NAMESPACE, event, payload)).encode()
    }
}

/// Slide counters reported alongside a processed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideCounters {
    /// Zero-based current slide
    pub current_slide: u32,
    /// Number of slides in the document
    pub total_slides: u32,
}

/// Validated `processed_frame` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFrame {
    /// Encoded frame as a data URL
    pub frame: String,
    /// Slide counters, present only when the service sent both
    pub slides: Option<SlideCounters>,
}

impl ProcessedFrame {
    /// Validate a raw event payload
    pub fn from_payload(payload: &Value) -> RelayResult<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| Self::malformed("payload is not an object"))?;

        let frame = match object.get("frame") {
            Some(Value::String(frame)) if !frame.is_empty() => frame.clone(),
            Some(Value::String(_)) => return Err(Self::malformed("frame is empty")),
            Some(_) => return Err(Self::malformed("frame is not a string")),
            None => return Err(Self::malformed("frame is missing")),
        };

        let counter = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
        };
        let slides = match (counter("currentSlide"), counter("totalSlides")) {
            (Some(current_slide), Some(total_slides)) => Some(SlideCounters {
                current_slide,
                total_slides,
            }),
            _ => None,
        };

        Ok(Self { frame, slides })
    }

    fn malformed(reason: &str) -> RelayError {
        RelayError::MalformedMessage {
            event: PROCESSED_FRAME_EVENT.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// `error` payload sent by the service when a frame could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceErrorPayload {
    /// Human-readable message
    #[serde(default = "ServiceErrorPayload::unknown")]
    pub message: String,
}

impl ServiceErrorPayload {
    fn unknown() -> String {
        "unknown service error".to_string()
    }

    /// Parse leniently; anything unrecognisable becomes a generic message
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::String(message) => Self {
                message: message.clone(),
            },
            other => serde_json::from_value(other.clone()).unwrap_or_else(|_| Self {
                message: Self::unknown(),
            }),
        }
    }
}
