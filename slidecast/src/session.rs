//! Relay session
//!
//! A [`Session`] owns one channel to the processing service and everything
//! hanging off it: the render loop for inbound frames, the capture loop while
//! streaming, and the supervisor that turns failures into cleanup.
//!
//! ```text
//!   Idle ──start──▶ Acquiring ──camera──▶ Streaming
//!    ▲                 │                      │
//!    │   acquisition   │        stop / disconnect / failure
//!    │     failed      ▼                      ▼
//!    └─────────────── Idle ◀──────────── Stopping
//! ```
//!
//! Every way out of streaming goes through the same idempotent cleanup.

use crate::capture_loop::{CaptureLoop, ProcessingToken};
use crate::config::RelayConfig;
use crate::event::{EventSink, EventStream, SessionEvent, StopReason};
use crate::render_loop::RenderLoop;
use crate::slides::SlideTracker;
use crate::upload::{DocumentUploader, UploadClient, UploadReceipt};
use parking_lot::Mutex;
use slidecast_core::{
    Channel, ChannelEvent, ChannelState, RelayError, RelayResult, PROCESSED_FRAME_EVENT,
    SERVICE_ERROR_EVENT,
};
use slidecast_diagnostics::{RelayCounter, RelayStats, RelayStatsSnapshot};
use slidecast_media::{
    DecodeQueue, FrameBuffer, MediaResources, NullSink, OutputSurface, SnapshotSink, SurfaceSink,
};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Streaming lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not streaming
    Idle,
    /// Opening the camera
    Acquiring,
    /// Capture loop running
    Streaming,
    /// Cleanup in progress
    Stopping,
}

impl SessionState {
    /// Whether a transition to `next` is legal
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Acquiring)
                | (Acquiring, Streaming)
                | (Acquiring, Idle)
                | (Acquiring, Stopping)
                | (Streaming, Stopping)
                | (Stopping, Idle)
        )
    }

    /// Camera held or being opened
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Acquiring | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

struct SessionInner {
    id: Uuid,
    config: RelayConfig,
    channel: Channel,
    state: watch::Sender<SessionState>,
    resources: Arc<MediaResources>,
    slides: SlideTracker,
    stats: Arc<RelayStats>,
    events: EventSink,
    uploader: Arc<dyn DocumentUploader>,
    processing: Mutex<Option<ProcessingToken>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    cleanup_lock: tokio::sync::Mutex<()>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) -> RelayResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!(session = %self.id, from = %state, to = %next, "Session state change");
                *state = next;
                true
            } else {
                result = Err(RelayError::InvalidState {
                    expected: format!("a state that can become {}", next),
                    actual: state.to_string(),
                });
                false
            }
        });
        result
    }

    /// Stop everything streaming holds; safe to call from any exit path
    ///
    /// Returns whether this call ended an active stream.
    async fn cleanup(&self, reason: StopReason) -> bool {
        let _guard = self.cleanup_lock.lock().await;

        let was_active = self.state().is_active();
        if was_active {
            let _ = self.transition(SessionState::Stopping);
        }

        if let Some(token) = self.processing.lock().take() {
            token.deactivate();
        }
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }

        let report = self.resources.release_all();

        if reason.disconnects_channel() && self.channel.is_connected() {
            self.channel.disconnect();
        }

        if !was_active {
            debug!(session = %self.id, %reason, "Cleanup with nothing streaming");
            return false;
        }

        let _ = self.transition(SessionState::Idle);
        info!(
            session = %self.id,
            camera_stopped = report.camera_stopped,
            "Streaming stopped: {}",
            reason
        );
        info!(session = %self.id, "Relay stats: {}", self.stats.snapshot());
        self.events.emit(SessionEvent::StreamingStopped { reason });
        true
    }

    fn teardown(&self) {
        if let Some(token) = self.processing.lock().take() {
            token.deactivate();
        }
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        self.resources.release_all();
        self.channel.disconnect();
    }
}

/// Client session against one processing service
pub struct Session {
    inner: Arc<SessionInner>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state())
            .field("channel", &self.inner.channel)
            .finish()
    }
}

impl Session {
    /// Connect to the configured service
    ///
    /// The channel connects in the background; watch the returned stream
    /// for `Connected` or `ConnectError`.
    pub fn connect(config: RelayConfig) -> RelayResult<(Self, EventStream)> {
        let uploader = Arc::new(UploadClient::new(&config)?);
        Self::with_uploader(config, uploader)
    }

    /// Connect using a custom document uploader
    pub fn with_uploader(
        config: RelayConfig,
        uploader: Arc<dyn DocumentUploader>,
    ) -> RelayResult<(Self, EventStream)> {
        config.validate()?;

        let id = Uuid::new_v4();
        let channel = Channel::new(&config.endpoint, config.channel.clone())?;
        let frames = channel.on_message(PROCESSED_FRAME_EVENT);
        let service_errors = channel.on_message(SERVICE_ERROR_EVENT);
        let channel_events = channel.subscribe();

        let sink: Box<dyn SurfaceSink> = match &config.output.snapshot_path {
            Some(path) => Box::new(SnapshotSink::new(path.clone())),
            None => Box::new(NullSink),
        };
        let decode = DecodeQueue::new(config.output.decode_capacity);
        let surface = OutputSurface::shared(sink);
        let resources = Arc::new(MediaResources::new(
            FrameBuffer::shared(config.capture.target_resolution),
            surface.clone(),
            decode.canceller(),
        ));

        let (events, stream) = EventSink::channel();
        let (state, _) = watch::channel(SessionState::Idle);
        let slides = SlideTracker::new();
        let stats = Arc::new(RelayStats::new());

        let inner = Arc::new(SessionInner {
            id,
            config,
            channel: channel.clone(),
            state,
            resources,
            slides: slides.clone(),
            stats: stats.clone(),
            events: events.clone(),
            uploader,
            processing: Mutex::new(None),
            supervisor: Mutex::new(None),
            cleanup_lock: tokio::sync::Mutex::new(()),
        });

        channel.start()?;

        let render = RenderLoop::new(decode, surface, slides, stats, events);
        let render = tokio::spawn(render.run(frames, service_errors));
        let forwarder = tokio::spawn(forward_channel_events(
            Arc::downgrade(&inner),
            channel_events,
        ));
        let mut tasks = vec![render.abort_handle(), forwarder.abort_handle()];
        tasks.push(
            tokio::spawn(watch_session_tasks(Arc::downgrade(&inner), render, forwarder))
                .abort_handle(),
        );
        info!(session = %id, endpoint = %channel.endpoint(), "Session created");

        Ok((
            Self {
                inner,
                tasks: Mutex::new(tasks),
            },
            stream,
        ))
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Configuration the session runs with
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Current streaming state
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Watch streaming state changes
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// The channel to the service
    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Slide counters reported by the service
    pub fn slides(&self) -> SlideTracker {
        self.inner.slides.clone()
    }

    /// Camera, buffers and output surface
    pub fn resources(&self) -> Arc<MediaResources> {
        self.inner.resources.clone()
    }

    /// Current counters
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Upload a presentation, then start streaming
    ///
    /// A rejected upload leaves the session idle and reports a blocking
    /// notification.
    pub async fn upload_and_start(&self, path: &Path) -> RelayResult<UploadReceipt> {
        let receipt = match self.inner.uploader.upload(path).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Upload error: {}", e);
                let reason = match &e {
                    RelayError::Upload { reason } => reason.clone(),
                    other => other.to_string(),
                };
                self.inner.events.emit(SessionEvent::notify(
                    format!("Failed to upload ppt: {}", reason),
                    true,
                ));
                return Err(e);
            }
        };

        self.start_streaming().await?;
        Ok(receipt)
    }

    /// Open the camera and start the capture loop
    ///
    /// Does nothing when already streaming.
    pub async fn start_streaming(&self) -> RelayResult<()> {
        let inner = &self.inner;
        if inner.state() == SessionState::Streaming {
            debug!(session = %inner.id, "Already streaming");
            return Ok(());
        }

        inner.transition(SessionState::Acquiring)?;
        if inner.channel.state() == ChannelState::Closed {
            let _ = inner.transition(SessionState::Idle);
            return Err(RelayError::ChannelClosed);
        }

        inner.resources.initialize_buffers();
        let acquired = inner
            .resources
            .acquire_camera(inner.config.camera_selection, inner.config.camera)
            .await;
        let camera = match acquired {
            Ok(camera) => camera,
            Err(e) => {
                let error = RelayError::from(e);
                error!("Error accessing webcam: {}", error);
                inner.resources.release_all();
                let _ = inner.transition(SessionState::Idle);
                inner.events.emit(SessionEvent::notify(
                    format!("Unable to access webcam: {}", error),
                    error.is_user_facing(),
                ));
                return Err(error);
            }
        };

        // Cleanup may have run while the camera was opening.
        if inner.state() != SessionState::Acquiring {
            inner.resources.release_all();
            return Err(RelayError::InvalidState {
                expected: SessionState::Acquiring.to_string(),
                actual: inner.state().to_string(),
            });
        }

        let token = ProcessingToken::new();
        let capture = CaptureLoop::new(
            camera.clone(),
            inner.resources.frame_buffer().clone(),
            Arc::new(inner.channel.clone()),
            &inner.config.capture,
            inner.stats.clone(),
        );
        let capture_task = tokio::spawn(capture.run(token.subscribe(), inner.resources.clone()));
        let supervisor = tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            capture_task,
            inner.config.handle_termination_signal,
        ));
        *inner.processing.lock() = Some(token);
        *inner.supervisor.lock() = Some(supervisor);

        inner.transition(SessionState::Streaming)?;
        info!(
            session = %inner.id,
            camera = %camera.name(),
            resolution = %inner.config.capture.target_resolution,
            "Streaming started"
        );
        inner.events.emit(SessionEvent::StreamingStarted {
            resolution: inner.config.capture.target_resolution,
        });
        Ok(())
    }

    /// Stop streaming and close the channel
    ///
    /// Returns whether anything was streaming.
    pub async fn stop_streaming(&self) -> bool {
        self.inner.cleanup(StopReason::Requested).await
    }

    /// Run cleanup for `reason`; repeated calls are no-ops
    pub async fn cleanup(&self, reason: StopReason) -> bool {
        self.inner.cleanup(reason).await
    }

    /// Stop streaming, close the channel and end the session's tasks
    pub async fn close(&self) {
        self.inner.cleanup(StopReason::Teardown).await;
        self.inner.channel.disconnect();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(session = %self.inner.id, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        self.inner.teardown();
    }
}

/// Watch the capture loop and the termination signal while streaming
async fn supervise(
    inner: Weak<SessionInner>,
    capture: JoinHandle<RelayResult<()>>,
    handle_signals: bool,
) {
    let reason = tokio::select! {
        joined = capture => match joined {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(capture_stop_reason(&e)),
            Err(e) if e.is_panic() => {
                error!("Capture loop panicked");
                Some(StopReason::TaskFailed("capture loop panicked".to_string()))
            }
            Err(_) => None,
        },
        _ = termination_signal(handle_signals) => {
            info!("Termination signal received");
            Some(StopReason::Teardown)
        }
    };

    if let (Some(reason), Some(inner)) = (reason, inner.upgrade()) {
        // Cleanup aborts this task, so it runs on its own.
        tokio::spawn(async move {
            inner.cleanup(reason).await;
        });
    }
}

/// Errors that end the whole session also close the channel
fn capture_stop_reason(error: &RelayError) -> StopReason {
    if error.is_fatal_to_session() {
        StopReason::TaskFailed(error.to_string())
    } else {
        StopReason::CaptureFailed(error.to_string())
    }
}

/// Run cleanup when the render loop or the event forwarder ends early
///
/// Both live as long as the session. Either one returning or panicking
/// leaves the session unable to render or react to the channel.
async fn watch_session_tasks(
    inner: Weak<SessionInner>,
    mut render: JoinHandle<()>,
    mut forwarder: JoinHandle<()>,
) {
    let (task, joined) = tokio::select! {
        joined = &mut render => ("render loop", joined),
        joined = &mut forwarder => ("channel event forwarder", joined),
    };

    let reason = match joined {
        Ok(()) => format!("{} stopped", task),
        Err(e) if e.is_panic() => format!("{} panicked", task),
        Err(_) => return,
    };
    let Some(inner) = inner.upgrade() else {
        return;
    };

    error!(session = %inner.id, "Session task ended: {}", reason);
    inner.cleanup(StopReason::TaskFailed(reason)).await;
}

async fn termination_signal(enabled: bool) {
    if enabled {
        match tokio::signal::ctrl_c().await {
            Ok(()) => return,
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    }
    std::future::pending::<()>().await
}

/// Turn channel lifecycle events into session events
async fn forward_channel_events(
    inner: Weak<SessionInner>,
    mut events: broadcast::Receiver<ChannelEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Channel events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            ChannelEvent::Connected { sid } => {
                info!(session = %inner.id, %sid, "Connected to server");
                inner.events.emit(SessionEvent::Connected { sid });
            }
            ChannelEvent::ConnectError { error } => {
                error!(session = %inner.id, "Connection error: {}", error);
                inner.events.emit(SessionEvent::ConnectError { error });
                inner.events.emit(SessionEvent::notify(
                    "Failed to connect to server. Please restart the client.",
                    true,
                ));
            }
            ChannelEvent::Disconnected { reason } => {
                info!(session = %inner.id, %reason, "Disconnected from server");
                inner.events.emit(SessionEvent::Disconnected {
                    reason: reason.to_string(),
                });
                if inner.state().is_active() {
                    inner.cleanup(StopReason::ChannelDisconnected).await;
                }
            }
            ChannelEvent::Reconnecting { attempt, delay } => {
                inner.stats.record(RelayCounter::ReconnectAttempts);
                inner
                    .events
                    .emit(SessionEvent::Reconnecting { attempt, delay });
            }
            ChannelEvent::Closed => {
                debug!(session = %inner.id, "Channel closed");
            }
        }
    }
}
