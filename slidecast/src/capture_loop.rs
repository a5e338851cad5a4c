//! Capture and transmit loop
//!
//! Wakes at the refresh rate, but only grabs, scales, encodes and sends a
//! frame once the frame interval has elapsed since the last frame the
//! channel accepted. Frames produced while the channel is down are dropped
//! and do not restart the interval.

use crate::config::CaptureConfig;
use serde_json::Value;
use slidecast_core::{Channel, RelayResult, PROCESS_FRAME_EVENT};
use slidecast_diagnostics::{RelayCounter, RelayStats};
use slidecast_media::{CameraHandle, MediaResources, SharedFrameBuffer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Where encoded frames go
pub trait FrameTransport: Send + Sync {
    /// Hand a frame to the service; false when it cannot be sent right now
    fn send_frame(&self, data_url: String) -> bool;
}

impl FrameTransport for Channel {
    fn send_frame(&self, data_url: String) -> bool {
        self.send(PROCESS_FRAME_EVENT, Value::String(data_url))
    }
}

/// Rate limiter keyed on the last accepted frame
#[derive(Debug, Clone)]
pub struct FrameGate {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl FrameGate {
    /// Gate allowing one frame per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Whether a frame may be produced at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Record a frame the channel accepted
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// When the last accepted frame went out
    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }
}

/// Shared on/off switch for frame processing
#[derive(Debug, Clone)]
pub struct ProcessingToken {
    active: Arc<watch::Sender<bool>>,
}

impl Default for ProcessingToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingToken {
    /// Token in the active state
    pub fn new() -> Self {
        let (active, _) = watch::channel(true);
        Self {
            active: Arc::new(active),
        }
    }

    /// Whether processing may continue
    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Stop processing; the loop exits after the step it is running
    pub fn deactivate(&self) {
        self.active.send_if_modified(|active| std::mem::replace(active, false));
    }

    /// Receiver observing the switch
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }
}

/// What one capture step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Frame interval not yet elapsed
    NotDue,
    /// Frame encoded and accepted by the channel
    Sent,
    /// Frame encoded but the channel was not connected
    Dropped,
    /// Camera had a transient problem; try again next tick
    Skipped,
}

/// The capture loop
pub struct CaptureLoop {
    camera: CameraHandle,
    frame_buffer: SharedFrameBuffer,
    transport: Arc<dyn FrameTransport>,
    gate: FrameGate,
    refresh_interval: Duration,
    jpeg_quality: f32,
    stats: Arc<RelayStats>,
}

impl CaptureLoop {
    /// Loop reading `camera` into `frame_buffer` and sending through `transport`
    pub fn new(
        camera: CameraHandle,
        frame_buffer: SharedFrameBuffer,
        transport: Arc<dyn FrameTransport>,
        config: &CaptureConfig,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            camera,
            frame_buffer,
            transport,
            gate: FrameGate::new(config.frame_interval()),
            refresh_interval: config.refresh_interval(),
            jpeg_quality: config.jpeg_quality,
            stats,
        }
    }

    /// The rate limiter
    pub fn gate(&self) -> &FrameGate {
        &self.gate
    }

    /// Run one step at `now`
    ///
    /// Recoverable camera errors skip the tick. Other capture and encode
    /// failures are returned; the caller stops the loop.
    pub fn step(&mut self, now: Instant) -> RelayResult<StepOutcome> {
        if !self.gate.is_due(now) {
            return Ok(StepOutcome::NotDue);
        }

        let frame = match self.camera.grab() {
            Ok(frame) => frame,
            Err(e) if e.is_recoverable() => {
                warn!(category = ?e.category(), "Camera frame skipped: {}", e);
                return Ok(StepOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        self.stats.record(RelayCounter::FramesCaptured);

        let data_url = self
            .frame_buffer
            .lock()
            .draw_and_encode(&frame, self.jpeg_quality)?;

        if self.transport.send_frame(data_url) {
            self.gate.mark_sent(now);
            self.stats.record(RelayCounter::FramesSent);
            trace!(timestamp = frame.timestamp, "Frame sent");
            Ok(StepOutcome::Sent)
        } else {
            self.stats.record(RelayCounter::FramesDroppedDisconnected);
            trace!("Channel not connected, frame dropped");
            Ok(StepOutcome::Dropped)
        }
    }

    /// Drive the loop until `active` turns false or a step fails
    ///
    /// Resources are released on every exit path.
    pub async fn run(
        mut self,
        mut active: watch::Receiver<bool>,
        resources: Arc<MediaResources>,
    ) -> RelayResult<()> {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(camera = %self.camera.name(), "Capture loop started");

        let result = loop {
            if !*active.borrow() {
                break Ok(());
            }

            tokio::select! {
                changed = active.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if !*active.borrow() {
                        break Ok(());
                    }
                    if let Err(e) = self.step(Instant::now()) {
                        error!("Frame processing failed: {}", e);
                        break Err(e);
                    }
                }
            }
        };

        let report = resources.release_all();
        debug!(camera_stopped = report.camera_stopped, "Capture loop finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use slidecast_media::{
        CameraConstraints, CameraSelection, CameraSource, DecodeCanceller, FrameBuffer,
        MediaError, MediaResult, NullSink, OutputSurface, Resolution, SyntheticCamera, VideoFrame,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        connected: AtomicBool,
        frames: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn connected() -> Arc<Self> {
            let transport = Self::default();
            transport.connected.store(true, Ordering::SeqCst);
            Arc::new(transport)
        }
    }

    impl FrameTransport for RecordingTransport {
        fn send_frame(&self, data_url: String) -> bool {
            if !self.connected.load(Ordering::SeqCst) {
                return false;
            }
            self.frames.lock().push(data_url);
            true
        }
    }

    fn capture_loop(transport: Arc<RecordingTransport>, camera: CameraHandle) -> CaptureLoop {
        CaptureLoop::new(
            camera,
            FrameBuffer::shared(Resolution::new(80, 60)),
            transport,
            &CaptureConfig::default(),
            Arc::new(RelayStats::new()),
        )
    }

    fn synthetic() -> CameraHandle {
        CameraHandle::new(Box::new(SyntheticCamera::new(Resolution::new(64, 48), 30)))
    }

    #[test]
    fn test_gate_first_frame_is_due() {
        let gate = FrameGate::new(Duration::from_millis(33));
        assert!(gate.is_due(Instant::now()));
        assert!(gate.last_sent().is_none());
    }

    #[tokio::test]
    async fn test_steps_within_interval_are_throttled() {
        let transport = RecordingTransport::connected();
        let mut capture = capture_loop(transport.clone(), synthetic());

        let start = Instant::now();
        let outcomes: Vec<_> = [0u64, 25, 50, 75, 100]
            .iter()
            .map(|ms| capture.step(start + Duration::from_millis(*ms)).unwrap())
            .collect();

        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Sent,
                StepOutcome::NotDue,
                StepOutcome::Sent,
                StepOutcome::NotDue,
                StepOutcome::Sent,
            ]
        );
        assert_eq!(transport.frames.lock().len(), 3);
        assert!(transport.frames.lock()[0].starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_disconnected_send_keeps_gate_open() {
        let transport = Arc::new(RecordingTransport::default());
        let mut capture = capture_loop(transport.clone(), synthetic());

        let now = Instant::now();
        assert_eq!(capture.step(now).unwrap(), StepOutcome::Dropped);
        assert!(capture.gate().last_sent().is_none());

        transport.connected.store(true, Ordering::SeqCst);
        let later = now + Duration::from_millis(1);
        assert_eq!(capture.step(later).unwrap(), StepOutcome::Sent);
        assert_eq!(capture.gate().last_sent(), Some(later));
        assert_eq!(capture.stats.get(RelayCounter::FramesDroppedDisconnected), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_is_returned() {
        let transport = RecordingTransport::connected();
        let camera = CameraHandle::new(Box::new(
            SyntheticCamera::new(Resolution::new(32, 24), 30).failing_after(1),
        ));
        let mut capture = capture_loop(transport, camera);

        let start = Instant::now();
        assert!(capture.step(start).is_ok());
        assert!(capture.step(start + Duration::from_millis(40)).is_err());
    }

    /// Times out once, then behaves
    struct StallingCamera {
        stalled: bool,
    }

    impl CameraSource for StallingCamera {
        fn name(&self) -> String {
            "stalling".to_string()
        }

        fn resolution(&self) -> Resolution {
            Resolution::new(16, 12)
        }

        fn grab(&mut self) -> MediaResult<VideoFrame> {
            if !self.stalled {
                self.stalled = true;
                return Err(MediaError::Timeout {
                    duration: Duration::from_millis(100),
                });
            }
            Ok(VideoFrame::blank(self.resolution()))
        }

        fn stop(&mut self) {}

        fn is_live(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_transient_camera_error_skips_tick() {
        let transport = RecordingTransport::connected();
        let camera = CameraHandle::new(Box::new(StallingCamera { stalled: false }));
        let mut capture = capture_loop(transport.clone(), camera);

        let now = Instant::now();
        assert_eq!(capture.step(now).unwrap(), StepOutcome::Skipped);
        assert!(capture.gate().last_sent().is_none());
        assert_eq!(capture.step(now).unwrap(), StepOutcome::Sent);
        assert_eq!(transport.frames.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_paces_frames_and_releases_camera() {
        let transport = RecordingTransport::connected();
        let resources = Arc::new(MediaResources::new(
            FrameBuffer::shared(Resolution::new(80, 60)),
            OutputSurface::shared(Box::new(NullSink)),
            DecodeCanceller::default(),
        ));
        resources.initialize_buffers();
        let camera = resources
            .acquire_camera(CameraSelection::Synthetic, CameraConstraints::default())
            .await
            .unwrap();

        let capture = capture_loop(transport.clone(), camera.clone());
        let token = ProcessingToken::new();
        let task = tokio::spawn(capture.run(token.subscribe(), resources.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.deactivate();
        assert!(task.await.unwrap().is_ok());

        // 30 fps over 100 ms of paused time.
        let sent = transport.frames.lock().len();
        assert!((2..=4).contains(&sent), "sent {} frames", sent);
        assert!(!camera.is_live());
        assert!(resources.camera().is_none());
    }

    #[test]
    fn test_token_deactivate() {
        let token = ProcessingToken::new();
        let rx = token.subscribe();
        assert!(token.is_active());

        token.deactivate();
        token.deactivate();
        assert!(!token.is_active());
        assert!(!*rx.borrow());
    }
}
