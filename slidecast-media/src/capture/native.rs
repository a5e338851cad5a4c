use super::{CameraConstraints, CameraInfo, CameraSelection, CameraSource};
use crate::error::{MediaError, MediaResult};
use crate::frame::{Resolution, VideoFrame};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution as DeviceResolution,
};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SETUP_TIMEOUT: Duration = Duration::from_secs(10);
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// System camera driven by nokhwa
///
/// nokhwa's `Camera` is not `Send`, so it lives on its own thread and hands
/// decoded RGB frames over a two-slot channel. Frames are dropped on the
/// camera side when the consumer falls behind.
pub struct NativeCamera {
    index: u32,
    name: String,
    resolution: Resolution,
    frames: mpsc::Receiver<VideoFrame>,
    latest: Option<VideoFrame>,
    running: Arc<AtomicBool>,
}

impl NativeCamera {
    /// Open camera `index` and wait until it streams
    pub fn open(index: u32, constraints: CameraConstraints) -> MediaResult<Self> {
        let (frame_tx, frames) = mpsc::sync_channel::<VideoFrame>(2);
        let (setup_tx, setup_rx) = mpsc::channel::<MediaResult<(String, Resolution)>>();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        std::thread::Builder::new()
            .name(format!("camera-{}", index))
            .spawn(move || {
                let fps = constraints.ideal_fps.min(constraints.max_fps);
                let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                    CameraFormat::new(
                        DeviceResolution::new(
                            constraints.ideal_resolution.width,
                            constraints.ideal_resolution.height,
                        ),
                        FrameFormat::MJPEG,
                        fps,
                    ),
                ));

                let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = setup_tx.send(Err(open_error(index, &e.to_string())));
                        return;
                    }
                };
                if let Err(e) = camera.open_stream() {
                    let _ = setup_tx.send(Err(open_error(index, &e.to_string())));
                    return;
                }

                let actual = camera.resolution();
                let resolution = Resolution::new(actual.width(), actual.height());
                let name = camera.info().human_name();
                if setup_tx.send(Ok((name, resolution))).is_err() {
                    let _ = camera.stop_stream();
                    return;
                }

                info!("Camera thread {} started at {}", index, resolution);
                let started = Instant::now();
                let mut buffer = vec![0u8; resolution.rgb_len()];
                while thread_running.load(Ordering::Relaxed) {
                    let raw = match camera.frame() {
                        Ok(raw) => raw,
                        Err(e) => {
                            debug!("Camera {} frame error: {}", index, e);
                            continue;
                        }
                    };
                    if let Err(e) = raw.decode_image_to_buffer::<RgbFormat>(&mut buffer) {
                        debug!("Camera {} decode error: {}", index, e);
                        continue;
                    }
                    let frame = VideoFrame {
                        width: resolution.width,
                        height: resolution.height,
                        data: buffer.clone(),
                        timestamp: started.elapsed().as_millis() as u64,
                    };
                    match frame_tx.try_send(frame) {
                        Ok(()) => {}
                        Err(mpsc::TrySendError::Full(_)) => {}
                        Err(mpsc::TrySendError::Disconnected(_)) => break,
                    }
                }

                if let Err(e) = camera.stop_stream() {
                    warn!("Camera {} did not stop cleanly: {}", index, e);
                }
                info!("Camera thread {} exiting", index);
            })?;

        let setup = setup_rx
            .recv_timeout(SETUP_TIMEOUT)
            .map_err(|_| MediaError::Timeout {
                duration: SETUP_TIMEOUT,
            })
            .and_then(|setup| setup);
        let (name, resolution) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                running.store(false, Ordering::Relaxed);
                return Err(e);
            }
        };

        // Opening runs on the blocking pool, so wait here rather than in `grab`.
        let first = match frames.recv_timeout(FIRST_FRAME_TIMEOUT) {
            Ok(frame) => frame,
            Err(_) => {
                running.store(false, Ordering::Relaxed);
                return Err(MediaError::Timeout {
                    duration: FIRST_FRAME_TIMEOUT,
                });
            }
        };

        Ok(Self {
            index,
            name,
            resolution,
            frames,
            latest: Some(first),
            running,
        })
    }
}

impl CameraSource for NativeCamera {
    fn name(&self) -> String {
        format!("{} ({})", self.name, self.index)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Latest frame the camera thread delivered; never waits
    fn grab(&mut self) -> MediaResult<VideoFrame> {
        loop {
            match self.frames.try_recv() {
                Ok(frame) => self.latest = Some(frame),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    if self.running.load(Ordering::Relaxed) {
                        return Err(MediaError::CaptureFailed {
                            reason: format!("camera {} stopped streaming", self.index),
                        });
                    }
                    break;
                }
            }
        }
        self.latest.clone().ok_or(MediaError::CaptureNotActive)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.latest = None;
    }

    fn is_live(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn open_error(index: u32, message: &str) -> MediaError {
    if message.to_lowercase().contains("permission") {
        MediaError::PermissionDenied {
            operation: format!("open camera {}: {}", index, message),
        }
    } else {
        MediaError::DeviceNotFound {
            device_id: format!("{} ({})", index, message),
        }
    }
}

/// Cameras the platform backend reports
pub(crate) fn query_devices() -> MediaResult<Vec<CameraInfo>> {
    let devices =
        nokhwa::query(ApiBackend::Auto).map_err(|e| MediaError::DeviceEnumerationFailed {
            reason: e.to_string(),
        })?;

    Ok(devices
        .into_iter()
        .enumerate()
        .map(|(position, device)| {
            let index = match device.index() {
                CameraIndex::Index(index) => *index,
                CameraIndex::String(_) => position as u32,
            };
            CameraInfo {
                selection: CameraSelection::Device(index),
                name: device.human_name(),
                description: device.description().to_string(),
            }
        })
        .collect())
}
