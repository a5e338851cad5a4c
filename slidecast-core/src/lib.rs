//! # Slidecast Core
//!
//! Persistent channel to the slide processing service, its Socket.IO wire
//! format and the error types shared by every slidecast crate.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod protocol;

// Re-export main types
pub use channel::{
    Channel, ChannelEvent, ChannelOptions, ChannelState, DisconnectReason, TransportMode,
};
pub use error::{RelayError, RelayResult};
pub use protocol::{
    EnginePacket, OpenHandshake, ProcessedFrame, ServiceErrorPayload, SlideCounters,
    SocketPacket, SocketPacketKind, DEFAULT_NAMESPACE, PROCESSED_FRAME_EVENT,
    PROCESS_FRAME_EVENT, SERVICE_ERROR_EVENT,
};
