//! Camera sources
//!
//! A [`CameraSource`] is the backend seam: the synthetic source is always
//! available, the nokhwa-backed device source only with the `native-camera`
//! feature. Sources are wrapped in a [`CameraHandle`] so the capture loop can
//! grab frames while the resource manager keeps the ability to stop the
//! camera from anywhere.

mod synthetic;

#[cfg(feature = "native-camera")]
mod native;

pub use synthetic::SyntheticCamera;

#[cfg(feature = "native-camera")]
pub use native::NativeCamera;

use crate::error::{MediaError, MediaResult};
use crate::frame::{Resolution, VideoFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Requested camera format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConstraints {
    /// Preferred capture resolution
    pub ideal_resolution: Resolution,
    /// Preferred frame rate
    pub ideal_fps: u32,
    /// Upper bound on the frame rate
    pub max_fps: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            ideal_resolution: Resolution::SVGA,
            ideal_fps: 50,
            max_fps: 50,
        }
    }
}

impl CameraConstraints {
    /// Validate constraints
    pub fn validate(&self) -> MediaResult<()> {
        if !self.ideal_resolution.is_valid() {
            return Err(MediaError::InvalidConfiguration {
                message: format!("Invalid camera resolution {}", self.ideal_resolution),
            });
        }
        if self.ideal_fps == 0 || self.max_fps == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Camera frame rate must be > 0".to_string(),
            });
        }
        if self.ideal_fps > self.max_fps {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "Ideal frame rate {} exceeds maximum {}",
                    self.ideal_fps, self.max_fps
                ),
            });
        }
        Ok(())
    }
}

/// A live frame source
pub trait CameraSource: Send {
    /// Human-readable name
    fn name(&self) -> String;

    /// Resolution frames are delivered at
    fn resolution(&self) -> Resolution;

    /// Latest frame
    fn grab(&mut self) -> MediaResult<VideoFrame>;

    /// Stop every track; further grabs fail
    fn stop(&mut self);

    /// Whether the source still delivers frames
    fn is_live(&self) -> bool;
}

/// Shared handle to the acquired camera
#[derive(Clone)]
pub struct CameraHandle {
    source: Arc<Mutex<Box<dyn CameraSource>>>,
}

impl fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.source.lock();
        f.debug_struct("CameraHandle")
            .field("name", &source.name())
            .field("live", &source.is_live())
            .finish()
    }
}

impl CameraHandle {
    /// Wrap a source
    pub fn new(source: Box<dyn CameraSource>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
        }
    }

    /// Grab the latest frame
    pub fn grab(&self) -> MediaResult<VideoFrame> {
        let mut source = self.source.lock();
        if !source.is_live() {
            return Err(MediaError::CaptureNotActive);
        }
        source.grab()
    }

    /// Stop the camera; idempotent
    pub fn stop(&self) {
        let mut source = self.source.lock();
        if source.is_live() {
            info!("Stopping camera {}", source.name());
            source.stop();
        }
    }

    /// Whether the camera is still live
    pub fn is_live(&self) -> bool {
        self.source.lock().is_live()
    }

    /// Delivered resolution
    pub fn resolution(&self) -> Resolution {
        self.source.lock().resolution()
    }

    /// Source name
    pub fn name(&self) -> String {
        self.source.lock().name()
    }
}

/// Which camera to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraSelection {
    /// Built-in moving test pattern
    #[default]
    Synthetic,
    /// System camera by index
    Device(u32),
}

impl FromStr for CameraSelection {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("synthetic") {
            return Ok(CameraSelection::Synthetic);
        }
        s.parse::<u32>()
            .map(CameraSelection::Device)
            .map_err(|_| MediaError::InvalidConfiguration {
                message: format!("Camera must be 'synthetic' or a device index, got '{}'", s),
            })
    }
}

impl fmt::Display for CameraSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSelection::Synthetic => write!(f, "synthetic"),
            CameraSelection::Device(index) => write!(f, "{}", index),
        }
    }
}

/// Camera found on the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// What to pass to open it
    pub selection: CameraSelection,
    /// Human-readable name
    pub name: String,
    /// Backend-specific description
    pub description: String,
}

/// Open a camera
///
/// Device cameras open on a dedicated thread; this waits for it to report
/// readiness without blocking the runtime.
pub async fn acquire_camera(
    selection: CameraSelection,
    constraints: CameraConstraints,
) -> MediaResult<CameraHandle> {
    constraints.validate()?;
    debug!("Acquiring camera {} with {:?}", selection, constraints);

    let source: Box<dyn CameraSource> = match selection {
        CameraSelection::Synthetic => Box::new(SyntheticCamera::new(
            constraints.ideal_resolution,
            constraints.ideal_fps,
        )),
        CameraSelection::Device(index) => open_device(index, constraints).await?,
    };

    info!(
        "Camera {} ready at {}",
        source.name(),
        source.resolution()
    );
    Ok(CameraHandle::new(source))
}

#[cfg(feature = "native-camera")]
async fn open_device(index: u32, constraints: CameraConstraints) -> MediaResult<Box<dyn CameraSource>> {
    let camera = tokio::task::spawn_blocking(move || NativeCamera::open(index, constraints))
        .await
        .map_err(|e| MediaError::CaptureFailed {
            reason: format!("camera thread failed: {}", e),
        })??;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "native-camera"))]
async fn open_device(index: u32, _constraints: CameraConstraints) -> MediaResult<Box<dyn CameraSource>> {
    Err(MediaError::UnsupportedPlatform {
        platform: format!(
            "camera {} requested but this build has no native camera support",
            index
        ),
    })
}

/// List available cameras
pub fn list_cameras() -> MediaResult<Vec<CameraInfo>> {
    let synthetic = CameraInfo {
        selection: CameraSelection::Synthetic,
        name: "Synthetic test pattern".to_string(),
        description: "Moving gradient, always available".to_string(),
    };

    #[cfg(feature = "native-camera")]
    let devices = native::query_devices()?;
    #[cfg(not(feature = "native-camera"))]
    let devices = Vec::new();

    Ok(std::iter::once(synthetic).chain(devices).collect())
}
