//! Error types for slidecast

use std::time::Duration;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Camera could not be opened (missing capture API, denied permission, no device)
    #[error("Camera acquisition failed: {reason}")]
    Acquisition {
        /// Reason for acquisition failure
        reason: String,
    },

    /// Channel could not be established
    #[error("Connection to {endpoint} failed: {reason}")]
    Connection {
        /// Endpoint the channel was connecting to
        endpoint: String,
        /// Reason for connection failure
        reason: String,
        /// Delay before the next automatic attempt, if any remain
        retry_in: Option<Duration>,
    },

    /// Document upload was rejected or could not be sent
    #[error("Upload failed: {reason}")]
    Upload {
        /// Server-provided detail, or a generic fallback
        reason: String,
    },

    /// Capture or encode step failed; halts the capture loop
    #[error("Frame processing failed: {reason}")]
    FrameProcessing {
        /// Reason for the failure
        reason: String,
    },

    /// Incoming frame could not be decoded
    #[error("Decoding failed: {reason}")]
    Decode {
        /// Reason for the failure
        reason: String,
    },

    /// Incoming message did not carry the expected payload
    #[error("Malformed {event} message: {reason}")]
    MalformedMessage {
        /// Event name the message arrived on
        event: String,
        /// What was wrong with it
        reason: String,
    },

    /// Invalid state transition
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Transport-level failure on an established channel
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Wire protocol violation
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Channel exhausted its reconnection budget or was closed by the client
    #[error("Channel closed")]
    ChannelClosed,
}

impl RelayError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::Acquisition { .. } => "ACQUISITION_FAILED",
            RelayError::Connection { .. } => "CONNECTION_FAILED",
            RelayError::Upload { .. } => "UPLOAD_FAILED",
            RelayError::FrameProcessing { .. } => "FRAME_PROCESSING_FAILED",
            RelayError::Decode { .. } => "DECODING_FAILED",
            RelayError::MalformedMessage { .. } => "MALFORMED_MESSAGE",
            RelayError::InvalidState { .. } => "INVALID_STATE",
            RelayError::Transport { .. } => "TRANSPORT_ERROR",
            RelayError::Protocol { .. } => "PROTOCOL_ERROR",
            RelayError::Timeout { .. } => "TIMEOUT",
            RelayError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            RelayError::ChannelClosed => "CHANNEL_CLOSED",
        }
    }

    /// Whether this error ends the streaming session (and so must run cleanup)
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            RelayError::Acquisition { .. }
                | RelayError::Connection { .. }
                | RelayError::Transport { .. }
                | RelayError::ChannelClosed
        )
    }

    /// Whether the error should be shown to the user as a blocking notification
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            RelayError::Acquisition { .. }
                | RelayError::Connection { .. }
                | RelayError::Upload { .. }
        )
    }
}

/// Result alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
