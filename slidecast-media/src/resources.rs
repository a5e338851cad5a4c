//! Resource lifecycle
//!
//! [`MediaResources`] owns everything that must be given back when a session
//! ends: the camera, the transmit buffer, the output surface and the decodes
//! still in flight. [`MediaResources::release_all`] is safe to call any number
//! of times from any exit path.

use crate::buffer::SharedFrameBuffer;
use crate::capture::{acquire_camera, CameraConstraints, CameraHandle, CameraSelection};
use crate::decode::DecodeCanceller;
use crate::error::MediaResult;
use crate::render::SharedOutputSurface;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// What a release actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseReport {
    /// A live camera was stopped
    pub camera_stopped: bool,
}

/// Resource lifecycle manager
pub struct MediaResources {
    camera: Mutex<Option<CameraHandle>>,
    frame_buffer: SharedFrameBuffer,
    surface: SharedOutputSurface,
    decode: DecodeCanceller,
    releases: AtomicU64,
}

impl MediaResources {
    /// Manage the given buffers and decode queue
    pub fn new(
        frame_buffer: SharedFrameBuffer,
        surface: SharedOutputSurface,
        decode: DecodeCanceller,
    ) -> Self {
        Self {
            camera: Mutex::new(None),
            frame_buffer,
            surface,
            decode,
            releases: 0.into(),
        }
    }

    /// Reset the transmit buffer and attach the output surface
    pub fn initialize_buffers(&self) {
        self.frame_buffer.lock().clear();
        self.surface.lock().attach();
        debug!("Frame buffer and output surface initialised");
    }

    /// Open the camera and hold on to it
    pub async fn acquire_camera(
        &self,
        selection: CameraSelection,
        constraints: CameraConstraints,
    ) -> MediaResult<CameraHandle> {
        let camera = acquire_camera(selection, constraints).await?;
        if let Some(previous) = self.camera.lock().replace(camera.clone()) {
            previous.stop();
        }
        Ok(camera)
    }

    /// Camera currently held
    pub fn camera(&self) -> Option<CameraHandle> {
        self.camera.lock().clone()
    }

    /// Transmit buffer
    pub fn frame_buffer(&self) -> &SharedFrameBuffer {
        &self.frame_buffer
    }

    /// Output surface
    pub fn surface(&self) -> &SharedOutputSurface {
        &self.surface
    }

    /// Stop the camera, empty both buffers and cancel pending decodes
    pub fn release_all(&self) -> ReleaseReport {
        let camera = self.camera.lock().take();
        let camera_stopped = match camera {
            Some(camera) => {
                let was_live = camera.is_live();
                camera.stop();
                was_live
            }
            None => false,
        };

        self.frame_buffer.lock().clear();
        self.surface.lock().clear();
        self.decode.cancel();

        let count = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
        if camera_stopped {
            info!("Media resources released");
        } else {
            debug!(count, "Media resources already released");
        }
        ReleaseReport { camera_stopped }
    }

    /// Times `release_all` has run
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameBuffer;
    use crate::frame::{Resolution, VideoFrame};
    use crate::render::{NullSink, OutputSurface};

    fn resources() -> MediaResources {
        MediaResources::new(
            FrameBuffer::shared(Resolution::new(16, 12)),
            OutputSurface::shared(Box::new(NullSink)),
            DecodeCanceller::default(),
        )
    }

    #[tokio::test]
    async fn test_release_all_is_idempotent() {
        let resources = resources();
        resources.initialize_buffers();
        let camera = resources
            .acquire_camera(CameraSelection::Synthetic, CameraConstraints::default())
            .await
            .unwrap();

        let frame = camera.grab().unwrap();
        resources.frame_buffer().lock().draw(&frame).unwrap();
        resources
            .surface()
            .lock()
            .present(&VideoFrame::blank(Resolution::new(4, 4)))
            .unwrap();

        let first = resources.release_all();
        assert!(first.camera_stopped);
        assert!(!camera.is_live());
        assert!(resources.frame_buffer().lock().is_empty());
        assert!(resources.surface().lock().pixels().is_none());

        let second = resources.release_all();
        assert!(!second.camera_stopped);
        assert_eq!(resources.release_count(), 2);
        assert!(resources.camera().is_none());
    }

    #[tokio::test]
    async fn test_replacing_camera_stops_previous() {
        let resources = resources();
        let first = resources
            .acquire_camera(CameraSelection::Synthetic, CameraConstraints::default())
            .await
            .unwrap();
        resources
            .acquire_camera(CameraSelection::Synthetic, CameraConstraints::default())
            .await
            .unwrap();
        assert!(!first.is_live());
    }
}
