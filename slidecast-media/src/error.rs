//! Media error types and handling
//!
//! Every failure inside the media pipeline is a [`MediaError`]. At the session
//! boundary it converts into the relay-wide [`RelayError`] so callers see one
//! taxonomy. Camera setup problems (missing device, denied permission, a
//! stalled or failed open) become acquisition errors. Decode problems stay
//! decode errors, and the rest become frame-processing errors.

use slidecast_core::RelayError;
use thiserror::Error;

/// Main error type for media operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Encoding operation failed
    #[error("Encoding failed: {codec} - {reason}")]
    EncodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Decoding operation failed
    #[error("Decoding failed: {codec} - {reason}")]
    DecodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Capture API not available on this build or platform
    #[error("Unsupported platform: {platform}")]
    UnsupportedPlatform {
        /// Platform name
        platform: String,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Device enumeration failed
    #[error("Device enumeration failed: {reason}")]
    DeviceEnumerationFailed {
        /// Failure reason
        reason: String,
    },

    /// Permission denied error
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Capture not active error
    #[error("Capture not active")]
    CaptureNotActive,

    /// Camera produced a frame it could not deliver
    #[error("Capture failed: {reason}")]
    CaptureFailed {
        /// Failure reason
        reason: String,
    },

    /// Timeout error
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// Duration after which timeout occurred
        duration: std::time::Duration,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Error categories for handling and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// System-level errors
    System,
    /// Configuration errors
    Configuration,
    /// Codec errors
    Codec,
    /// Data errors
    Data,
    /// Device errors
    Device,
    /// Platform errors
    Platform,
    /// State errors
    State,
}

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Io { .. } => true,
            MediaError::Timeout { .. } => true,
            MediaError::DecodingFailed { .. } => true,
            MediaError::InvalidFrameData { .. } => true,
            MediaError::EncodingFailed { .. } => false,
            MediaError::UnsupportedPlatform { .. } => false,
            MediaError::PermissionDenied { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Io { .. } => ErrorCategory::System,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::EncodingFailed { .. } => ErrorCategory::Codec,
            MediaError::DecodingFailed { .. } => ErrorCategory::Codec,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::UnsupportedPlatform { .. } => ErrorCategory::Platform,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::DeviceEnumerationFailed { .. } => ErrorCategory::Device,
            MediaError::PermissionDenied { .. } => ErrorCategory::System,
            MediaError::CaptureNotActive => ErrorCategory::State,
            MediaError::CaptureFailed { .. } => ErrorCategory::Device,
            MediaError::Timeout { .. } => ErrorCategory::System,
        }
    }
}

impl From<MediaError> for RelayError {
    fn from(error: MediaError) -> Self {
        match error {
            MediaError::UnsupportedPlatform { .. }
            | MediaError::DeviceNotFound { .. }
            | MediaError::DeviceEnumerationFailed { .. }
            | MediaError::PermissionDenied { .. }
            | MediaError::Timeout { .. }
            | MediaError::Io { .. } => RelayError::Acquisition {
                reason: error.to_string(),
            },
            MediaError::DecodingFailed { .. } => RelayError::Decode {
                reason: error.to_string(),
            },
            MediaError::InvalidConfiguration { message } => RelayError::InvalidConfiguration {
                field: "media".to_string(),
                reason: message,
            },
            other => RelayError::FrameProcessing {
                reason: other.to_string(),
            },
        }
    }
}
