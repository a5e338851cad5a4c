//! Output surface for processed frames
//!
//! The surface is a software pixel buffer that takes the size of every frame
//! presented to it. After each successful present it hands its pixels to a
//! [`SurfaceSink`], which is where a display or file writer plugs in.

use crate::error::{MediaError, MediaResult};
use crate::frame::{Resolution, VideoFrame};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handle; the render loop is the only writer
pub type SharedOutputSurface = Arc<Mutex<OutputSurface>>;

/// Consumer of rendered pixels
pub trait SurfaceSink: Send {
    /// Called after every render
    fn on_render(&mut self, pixels: &RgbImage) -> MediaResult<()>;
}

/// Discards rendered pixels
#[derive(Debug, Default)]
pub struct NullSink;

impl SurfaceSink for NullSink {
    fn on_render(&mut self, _pixels: &RgbImage) -> MediaResult<()> {
        Ok(())
    }
}

/// Writes the latest rendered frame to an image file
///
/// The format follows the file extension.
#[derive(Debug)]
pub struct SnapshotSink {
    path: PathBuf,
    written: u64,
}

impl SnapshotSink {
    /// Write to `path` on every render
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: 0,
        }
    }

    /// Snapshots written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl SurfaceSink for SnapshotSink {
    fn on_render(&mut self, pixels: &RgbImage) -> MediaResult<()> {
        pixels
            .save(&self.path)
            .map_err(|e| MediaError::EncodingFailed {
                codec: "snapshot".to_string(),
                reason: format!("{}: {}", self.path.display(), e),
            })?;
        self.written += 1;
        Ok(())
    }
}

/// On-screen pixel buffer
pub struct OutputSurface {
    attached: bool,
    pixels: Option<RgbImage>,
    frames_rendered: u64,
    sink: Box<dyn SurfaceSink>,
}

impl std::fmt::Debug for OutputSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSurface")
            .field("attached", &self.attached)
            .field("dimensions", &self.dimensions())
            .field("frames_rendered", &self.frames_rendered)
            .finish()
    }
}

impl Default for OutputSurface {
    fn default() -> Self {
        Self::new(Box::new(NullSink))
    }
}

impl OutputSurface {
    /// Detached surface feeding `sink`
    pub fn new(sink: Box<dyn SurfaceSink>) -> Self {
        Self {
            attached: false,
            pixels: None,
            frames_rendered: 0,
            sink,
        }
    }

    /// Create a shared detached surface
    pub fn shared(sink: Box<dyn SurfaceSink>) -> SharedOutputSurface {
        Arc::new(Mutex::new(Self::new(sink)))
    }

    /// Make the surface available for rendering
    pub fn attach(&mut self) {
        self.attached = true;
    }

    /// Whether the surface exists
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Size of the last rendered frame
    pub fn dimensions(&self) -> Option<Resolution> {
        self.pixels
            .as_ref()
            .map(|pixels| Resolution::new(pixels.width(), pixels.height()))
    }

    /// Rendered pixels
    pub fn pixels(&self) -> Option<&RgbImage> {
        self.pixels.as_ref()
    }

    /// Frames rendered since creation
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Resize to the frame, clear, and draw it at the origin
    ///
    /// Returns `false` without touching anything when the surface is
    /// detached.
    pub fn present(&mut self, frame: &VideoFrame) -> MediaResult<bool> {
        if !self.attached {
            debug!("Output surface detached, skipping render");
            return Ok(false);
        }

        let image = frame.to_image()?;
        self.pixels = Some(image);
        self.frames_rendered += 1;

        if let Some(pixels) = &self.pixels {
            if let Err(e) = self.sink.on_render(pixels) {
                warn!("Surface sink failed: {}", e);
            }
        }
        Ok(true)
    }

    /// Drop the pixels and detach
    pub fn clear(&mut self) {
        self.pixels = None;
        self.attached = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_surface_ignores_frames() {
        let mut surface = OutputSurface::default();
        let rendered = surface
            .present(&VideoFrame::blank(Resolution::new(10, 10)))
            .unwrap();
        assert!(!rendered);
        assert_eq!(surface.dimensions(), None);
    }

    #[test]
    fn test_surface_takes_frame_dimensions() {
        let mut surface = OutputSurface::default();
        surface.attach();

        surface
            .present(&VideoFrame::blank(Resolution::new(10, 10)))
            .unwrap();
        assert_eq!(surface.dimensions(), Some(Resolution::new(10, 10)));

        surface
            .present(&VideoFrame::blank(Resolution::new(30, 20)))
            .unwrap();
        assert_eq!(surface.dimensions(), Some(Resolution::new(30, 20)));
        assert_eq!(surface.frames_rendered(), 2);
    }

    #[test]
    fn test_clear_detaches() {
        let mut surface = OutputSurface::default();
        surface.attach();
        surface
            .present(&VideoFrame::blank(Resolution::new(4, 4)))
            .unwrap();

        surface.clear();
        assert!(!surface.is_attached());
        assert!(surface.pixels().is_none());
    }

    #[test]
    fn test_snapshot_sink_writes_file() {
        let path = std::env::temp_dir().join(format!("slidecast-snapshot-{}.png", std::process::id()));
        let mut surface = OutputSurface::new(Box::new(SnapshotSink::new(&path)));
        surface.attach();
        surface
            .present(&VideoFrame::blank(Resolution::new(6, 4)))
            .unwrap();

        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (6, 4));
        let _ = std::fs::remove_file(&path);
    }
}
