//! Off-screen transmit buffer

use crate::codec::encode_data_url;
use crate::error::{MediaError, MediaResult};
use crate::frame::{Resolution, VideoFrame};
use image::imageops::{self, FilterType};
use image::RgbImage;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handle; the capture loop is the only writer
pub type SharedFrameBuffer = Arc<Mutex<FrameBuffer>>;

/// Fixed-size buffer every camera frame is scaled into before encoding
///
/// Pixels are allocated on first draw and dropped by [`FrameBuffer::clear`],
/// so a cleared buffer is recreated lazily by the next draw.
#[derive(Debug)]
pub struct FrameBuffer {
    target: Resolution,
    pixels: Option<RgbImage>,
}

impl FrameBuffer {
    /// Create an empty buffer with fixed target dimensions
    pub fn new(target: Resolution) -> Self {
        Self {
            target,
            pixels: None,
        }
    }

    /// Create a shared empty buffer
    pub fn shared(target: Resolution) -> SharedFrameBuffer {
        Arc::new(Mutex::new(Self::new(target)))
    }

    /// Target dimensions
    pub fn target(&self) -> Resolution {
        self.target
    }

    /// Whether pixels are currently allocated
    pub fn is_empty(&self) -> bool {
        self.pixels.is_none()
    }

    /// Draw a frame scaled to the target dimensions
    pub fn draw(&mut self, frame: &VideoFrame) -> MediaResult<&RgbImage> {
        if !self.target.is_valid() {
            return Err(MediaError::InvalidConfiguration {
                message: format!("Invalid frame buffer size {}", self.target),
            });
        }

        let source = frame.to_image()?;
        let scaled = if frame.resolution() == self.target {
            source
        } else {
            imageops::resize(
                &source,
                self.target.width,
                self.target.height,
                FilterType::Triangle,
            )
        };

        Ok(&*self.pixels.insert(scaled))
    }

    /// Draw a frame and encode the buffer as a JPEG data URL
    pub fn draw_and_encode(&mut self, frame: &VideoFrame, quality: f32) -> MediaResult<String> {
        let pixels = self.draw(frame)?;
        encode_data_url(pixels, quality)
    }

    /// Drop the pixels
    pub fn clear(&mut self) {
        self.pixels = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_data_url;

    #[test]
    fn test_draw_scales_to_target() {
        let mut buffer = FrameBuffer::new(Resolution::new(80, 60));
        assert!(buffer.is_empty());

        let frame = VideoFrame::blank(Resolution::new(160, 90));
        let pixels = buffer.draw(&frame).unwrap();
        assert_eq!(pixels.dimensions(), (80, 60));
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_encode_uses_target_dimensions() {
        let mut buffer = FrameBuffer::new(Resolution::new(40, 30));
        let frame = VideoFrame::blank(Resolution::new(64, 64));
        let url = buffer.draw_and_encode(&frame, 0.85).unwrap();

        let decoded = decode_data_url(&url).unwrap();
        assert_eq!(decoded.resolution(), Resolution::new(40, 30));
    }

    #[test]
    fn test_clear_then_redraw() {
        let mut buffer = FrameBuffer::new(Resolution::new(8, 8));
        buffer.draw(&VideoFrame::blank(Resolution::new(8, 8))).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());

        buffer.draw(&VideoFrame::blank(Resolution::new(4, 4))).unwrap();
        assert!(!buffer.is_empty());
    }
}
