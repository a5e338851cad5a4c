//! Raw video frames and resolutions

use crate::error::{MediaError, MediaResult};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per RGB24 pixel
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 640x480
    pub const VGA: Self = Self::new(640, 480);
    /// 800x600
    pub const SVGA: Self = Self::new(800, 600);
    /// 1280x720
    pub const HD: Self = Self::new(1280, 720);

    /// Number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of an RGB24 buffer at this resolution
    pub fn rgb_len(&self) -> usize {
        self.pixel_count() * RGB_BYTES_PER_PIXEL
    }

    /// Both dimensions are non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Uncompressed RGB24 video frame
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Row-major RGB24 pixels
    pub data: Vec<u8>,
    /// Capture timestamp in milliseconds since the source started
    pub timestamp: u64,
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl VideoFrame {
    /// Create a frame, checking the buffer length against the dimensions
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp: u64) -> MediaResult<Self> {
        let expected = Resolution::new(width, height).rgb_len();
        if data.len() != expected {
            return Err(MediaError::InvalidFrameData {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            timestamp,
        })
    }

    /// Black frame
    pub fn blank(resolution: Resolution) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            data: vec![0; resolution.rgb_len()],
            timestamp: 0,
        }
    }

    /// Frame dimensions
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Copy into an image buffer
    pub fn to_image(&self) -> MediaResult<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            MediaError::InvalidFrameData {
                expected: self.resolution().rgb_len(),
                actual: self.data.len(),
            },
        )
    }

    /// Take ownership of an image buffer
    pub fn from_image(image: RgbImage, timestamp: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution() {
        assert_eq!(Resolution::SVGA.pixel_count(), 480_000);
        assert_eq!(Resolution::SVGA.rgb_len(), 1_440_000);
        assert_eq!(Resolution::HD.to_string(), "1280x720");
        assert!(!Resolution::new(0, 600).is_valid());
    }

    #[test]
    fn test_frame_length_is_checked() {
        assert!(VideoFrame::new(2, 2, vec![0; 12], 0).is_ok());
        let error = VideoFrame::new(2, 2, vec![0; 11], 0).unwrap_err();
        assert!(matches!(
            error,
            MediaError::InvalidFrameData {
                expected: 12,
                actual: 11
            }
        ));
    }

    #[test]
    fn test_image_conversion() {
        let frame = VideoFrame::blank(Resolution::new(4, 3));
        let image = frame.to_image().unwrap();
        assert_eq!(image.dimensions(), (4, 3));

        let back = VideoFrame::from_image(image, 7);
        assert_eq!(back.resolution(), Resolution::new(4, 3));
        assert_eq!(back.timestamp, 7);
    }
}
