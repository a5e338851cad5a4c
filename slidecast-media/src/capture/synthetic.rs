use super::CameraSource;
use crate::error::{MediaError, MediaResult};
use crate::frame::{Resolution, VideoFrame};

/// Deterministic moving test pattern
///
/// Each grab shifts a diagonal gradient by a few pixels so consecutive frames
/// differ. `failing_after` makes the source error once a number of frames has
/// been delivered.
#[derive(Debug)]
pub struct SyntheticCamera {
    resolution: Resolution,
    fps: u32,
    frames_delivered: u64,
    fail_after: Option<u64>,
    live: bool,
}

impl SyntheticCamera {
    /// Create a live source
    pub fn new(resolution: Resolution, fps: u32) -> Self {
        Self {
            resolution,
            fps: fps.max(1),
            frames_delivered: 0,
            fail_after: None,
            live: true,
        }
    }

    /// Fail every grab after `frames` successful ones
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Frames handed out so far
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    fn render(&self) -> Vec<u8> {
        let Resolution { width, height } = self.resolution;
        let shift = (self.frames_delivered.wrapping_mul(4) % u64::from(width.max(1))) as u32;
        let mut data = Vec::with_capacity(self.resolution.rgb_len());
        for y in 0..height {
            for x in 0..width {
                let r = ((x + shift) % width * 255 / width) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                let b = ((x + y + shift) % 256) as u8;
                data.extend_from_slice(&[r, g, b]);
            }
        }
        data
    }
}

impl CameraSource for SyntheticCamera {
    fn name(&self) -> String {
        "synthetic".to_string()
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn grab(&mut self) -> MediaResult<VideoFrame> {
        if !self.live {
            return Err(MediaError::CaptureNotActive);
        }
        if let Some(limit) = self.fail_after {
            if self.frames_delivered >= limit {
                return Err(MediaError::CaptureFailed {
                    reason: format!("synthetic source stopped after {} frames", limit),
                });
            }
        }

        let timestamp = self.frames_delivered * 1000 / u64::from(self.fps);
        let frame = VideoFrame::new(
            self.resolution.width,
            self.resolution.height,
            self.render(),
            timestamp,
        )?;
        self.frames_delivered += 1;
        Ok(frame)
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_move() {
        let mut camera = SyntheticCamera::new(Resolution::new(64, 48), 30);
        let first = camera.grab().unwrap();
        let second = camera.grab().unwrap();

        assert_eq!(first.resolution(), Resolution::new(64, 48));
        assert_ne!(first.data, second.data);
        assert_eq!(second.timestamp, 33);
        assert_eq!(camera.frames_delivered(), 2);
    }

    #[test]
    fn test_failing_after() {
        let mut camera = SyntheticCamera::new(Resolution::new(8, 8), 30).failing_after(1);
        assert!(camera.grab().is_ok());
        assert!(matches!(
            camera.grab(),
            Err(MediaError::CaptureFailed { .. })
        ));
    }
}
