//! Configuration types and defaults

use slidecast_core::{ChannelOptions, RelayError, RelayResult};
use slidecast_media::{CameraConstraints, CameraSelection, Resolution, DEFAULT_DECODE_CAPACITY};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default service endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000";

/// Capture and transmit settings
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Ceiling on transmitted frames per second
    pub max_fps: u32,
    /// How often the capture loop wakes up to consider a frame
    pub refresh_rate_hz: u32,
    /// Resolution frames are scaled to before encoding
    pub target_resolution: Resolution,
    /// JPEG quality on the 0.0..=1.0 scale
    pub jpeg_quality: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_fps: 30,
            refresh_rate_hz: 60,
            target_resolution: Resolution::SVGA,
            jpeg_quality: 0.85,
        }
    }
}

impl CaptureConfig {
    /// Reduced rate and size for constrained links
    pub fn low_bandwidth() -> Self {
        Self {
            max_fps: 15,
            target_resolution: Resolution::VGA,
            jpeg_quality: 0.7,
            ..Default::default()
        }
    }

    /// Larger frames at full rate
    pub fn high_quality() -> Self {
        Self {
            max_fps: 30,
            target_resolution: Resolution::HD,
            jpeg_quality: 0.9,
            ..Default::default()
        }
    }

    /// Minimum spacing between transmitted frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.max_fps.max(1)
    }

    /// Spacing between capture loop wake-ups
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(1) / self.refresh_rate_hz.max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> RelayResult<()> {
        if self.max_fps == 0 || self.max_fps > 120 {
            return Err(invalid("capture.max_fps", "must be between 1 and 120"));
        }
        if self.refresh_rate_hz == 0 || self.refresh_rate_hz > 240 {
            return Err(invalid("capture.refresh_rate_hz", "must be between 1 and 240"));
        }
        if !self.target_resolution.is_valid() {
            return Err(invalid(
                "capture.target_resolution",
                "width and height must be > 0",
            ));
        }
        if !(self.jpeg_quality > 0.0 && self.jpeg_quality <= 1.0) {
            return Err(invalid("capture.jpeg_quality", "must be in (0, 1]"));
        }
        Ok(())
    }
}

/// Document upload settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Path of the upload route on the service
    pub route: String,
    /// Multipart field carrying the document
    pub field_name: String,
    /// Accepted file extension, without the dot
    pub extension: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            route: "/upload-ppt".to_string(),
            field_name: "file".to_string(),
            extension: "pptx".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Output surface settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Write every rendered frame to this image file
    pub snapshot_path: Option<PathBuf>,
    /// Decodes tracked at once
    pub decode_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            decode_capacity: DEFAULT_DECODE_CAPACITY,
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the processing service
    pub endpoint: String,
    /// Channel connection options
    pub channel: ChannelOptions,
    /// Capture and transmit settings
    pub capture: CaptureConfig,
    /// Which camera to open
    pub camera_selection: CameraSelection,
    /// Requested camera format
    pub camera: CameraConstraints,
    /// Upload settings
    pub upload: UploadConfig,
    /// Output settings
    pub output: OutputConfig,
    /// Stop streaming on Ctrl-C
    pub handle_termination_signal: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            channel: ChannelOptions::default(),
            capture: CaptureConfig::default(),
            camera_selection: CameraSelection::default(),
            camera: CameraConstraints::default(),
            upload: UploadConfig::default(),
            output: OutputConfig::default(),
            handle_termination_signal: true,
        }
    }
}

impl RelayConfig {
    /// Default configuration for another endpoint
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Validate every section
    pub fn validate(&self) -> RelayResult<()> {
        let endpoint = self.endpoint_url()?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid("endpoint", "must be an http or https URL"));
        }
        self.channel.validate()?;
        self.capture.validate()?;
        self.camera.validate().map_err(RelayError::from)?;
        if self.output.decode_capacity == 0 {
            return Err(invalid("output.decode_capacity", "must be > 0"));
        }
        if !self.upload.route.starts_with('/') {
            return Err(invalid("upload.route", "must start with '/'"));
        }
        Ok(())
    }

    /// Parsed endpoint
    pub fn endpoint_url(&self) -> RelayResult<Url> {
        Url::parse(&self.endpoint).map_err(|e| RelayError::InvalidConfiguration {
            field: "endpoint".to_string(),
            reason: format!("'{}': {}", self.endpoint, e),
        })
    }

    /// Full URL of the upload route
    pub fn upload_url(&self) -> RelayResult<Url> {
        self.endpoint_url()?
            .join(&self.upload.route)
            .map_err(|e| RelayError::InvalidConfiguration {
                field: "upload.route".to_string(),
                reason: e.to_string(),
            })
    }
}

fn invalid(field: &str, reason: &str) -> RelayError {
    RelayError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.endpoint, "http://localhost:5000");
        assert_eq!(config.capture.max_fps, 30);
        assert_eq!(config.capture.target_resolution, Resolution::new(800, 600));
        assert_eq!(config.capture.jpeg_quality, 0.85);
        assert_eq!(config.camera.ideal_fps, 50);
        assert_eq!(config.channel.reconnection_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frame_interval() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.frame_interval().as_micros(), 33_333);
        assert_eq!(CaptureConfig::low_bandwidth().frame_interval().as_micros(), 66_666);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(CaptureConfig::low_bandwidth().validate().is_ok());
        assert!(CaptureConfig::high_quality().validate().is_ok());
        assert_eq!(
            CaptureConfig::high_quality().target_resolution,
            Resolution::HD
        );
    }

    #[test]
    fn test_invalid_capture() {
        let capture = CaptureConfig {
            jpeg_quality: 1.5,
            ..Default::default()
        };
        assert!(capture.validate().is_err());

        let capture = CaptureConfig {
            max_fps: 0,
            ..Default::default()
        };
        assert!(capture.validate().is_err());
    }

    #[test]
    fn test_upload_url() {
        let config = RelayConfig::for_endpoint("http://slides.local:8080");
        assert_eq!(
            config.upload_url().unwrap().as_str(),
            "http://slides.local:8080/upload-ppt"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let config = RelayConfig::for_endpoint("ws://slides.local");
        assert!(config.validate().is_err());

        let config = RelayConfig::for_endpoint("slides");
        assert!(config.validate().is_err());
    }
}
