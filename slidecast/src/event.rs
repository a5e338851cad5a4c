//! Session events

use crate::slides::SlideState;
use slidecast_media::Resolution;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Why streaming stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop_streaming` was called
    Requested,
    /// The channel dropped
    ChannelDisconnected,
    /// Capture or encode failed
    CaptureFailed(String),
    /// A session task failed or panicked
    TaskFailed(String),
    /// Termination signal or session drop
    Teardown,
}

impl StopReason {
    /// Whether cleanup should also close the channel
    ///
    /// A failed capture loop stops only itself, and a dropped channel is
    /// left to reconnect.
    pub fn disconnects_channel(&self) -> bool {
        matches!(
            self,
            StopReason::Requested | StopReason::TaskFailed(_) | StopReason::Teardown
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::ChannelDisconnected => write!(f, "channel disconnected"),
            StopReason::CaptureFailed(reason) => write!(f, "capture failed: {}", reason),
            StopReason::TaskFailed(reason) => write!(f, "task failed: {}", reason),
            StopReason::Teardown => write!(f, "teardown"),
        }
    }
}

/// Events a session reports to its owner
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Channel connected
    Connected {
        /// Engine.IO session id
        sid: String,
    },
    /// A connect attempt failed
    ConnectError {
        /// What went wrong
        error: String,
    },
    /// Channel connection lost
    Disconnected {
        /// Why it was lost
        reason: String,
    },
    /// Channel is about to retry
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Camera acquired and the capture loop is running
    StreamingStarted {
        /// Resolution frames are transmitted at
        resolution: Resolution,
    },
    /// Streaming stopped and resources were released
    StreamingStopped {
        /// Why it stopped
        reason: StopReason,
    },
    /// Slide counters changed
    SlidesChanged {
        /// New counters
        slides: SlideState,
    },
    /// A processed frame was drawn
    FrameRendered {
        /// Decode sequence number
        sequence: u64,
        /// Frame size
        resolution: Resolution,
    },
    /// The service reported it failed to process a frame
    ServiceError {
        /// Service-provided message
        message: String,
    },
    /// Message meant for the user
    Notification {
        /// Text to show
        message: String,
        /// Must be acknowledged before anything else happens
        blocking: bool,
    },
}

impl SessionEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::ConnectError { .. } => "connect_error",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::Reconnecting { .. } => "reconnecting",
            SessionEvent::StreamingStarted { .. } => "streaming_started",
            SessionEvent::StreamingStopped { .. } => "streaming_stopped",
            SessionEvent::SlidesChanged { .. } => "slides_changed",
            SessionEvent::FrameRendered { .. } => "frame_rendered",
            SessionEvent::ServiceError { .. } => "service_error",
            SessionEvent::Notification { .. } => "notification",
        }
    }

    /// Check if this is a connection-related event
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            SessionEvent::Connected { .. }
                | SessionEvent::ConnectError { .. }
                | SessionEvent::Disconnected { .. }
                | SessionEvent::Reconnecting { .. }
        )
    }

    /// Notification helper
    pub fn notify(message: impl Into<String>, blocking: bool) -> Self {
        SessionEvent::Notification {
            message: message.into(),
            blocking,
        }
    }
}

/// Per-frame events buffered for an owner that stops polling; older ones win
pub const FRAME_EVENT_CAPACITY: usize = 64;

/// Stream of session events for async iteration
///
/// Lifecycle events are never dropped. [`SessionEvent::FrameRendered`]
/// travels on a bounded side queue and is discarded while that queue is full.
#[derive(Debug)]
pub struct EventStream {
    lifecycle: mpsc::UnboundedReceiver<SessionEvent>,
    frames: mpsc::Receiver<SessionEvent>,
}

impl EventStream {
    /// Get the next event from the stream
    ///
    /// Lifecycle events are delivered ahead of queued frame events.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            biased;
            Some(event) = self.lifecycle.recv() => Some(event),
            Some(event) = self.frames.recv() => Some(event),
            else => None,
        }
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<SessionEvent>, mpsc::error::TryRecvError> {
        match self.lifecycle.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(lifecycle) => match self.frames.try_recv() {
                Ok(event) => Ok(Some(event)),
                Err(mpsc::error::TryRecvError::Disconnected)
                    if lifecycle == mpsc::error::TryRecvError::Disconnected =>
                {
                    Err(mpsc::error::TryRecvError::Disconnected)
                }
                Err(_) => Ok(None),
            },
        }
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.lifecycle.close();
        self.frames.close();
    }
}

/// Sending half shared by the session's tasks
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    lifecycle: mpsc::UnboundedSender<SessionEvent>,
    frames: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, EventStream) {
        let (lifecycle_tx, lifecycle) = mpsc::unbounded_channel();
        let (frames_tx, frames) = mpsc::channel(FRAME_EVENT_CAPACITY);
        (
            Self {
                lifecycle: lifecycle_tx,
                frames: frames_tx,
            },
            EventStream { lifecycle, frames },
        )
    }

    /// Emit an event; a dropped stream is fine
    pub(crate) fn emit(&self, event: SessionEvent) {
        if matches!(event, SessionEvent::FrameRendered { .. }) {
            if let Err(mpsc::error::TrySendError::Full(_)) = self.frames.try_send(event) {
                trace!("Event stream not polled, frame event dropped");
            }
            return;
        }
        let _ = self.lifecycle.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_stream() {
        let (sink, mut stream) = EventSink::channel();
        sink.emit(SessionEvent::notify("Camera not available", true));

        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type(), "notification");
        assert!(matches!(
            event,
            SessionEvent::Notification { blocking: true, .. }
        ));
        assert!(stream.try_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_events_are_bounded() {
        let (sink, mut stream) = EventSink::channel();
        for sequence in 0..1000 {
            sink.emit(SessionEvent::FrameRendered {
                sequence,
                resolution: Resolution::new(8, 8),
            });
        }
        sink.emit(SessionEvent::StreamingStopped {
            reason: StopReason::Requested,
        });

        // The lifecycle event is not stuck behind the frame backlog.
        assert!(matches!(
            stream.next().await,
            Some(SessionEvent::StreamingStopped { .. })
        ));

        let mut frames = Vec::new();
        while let Some(event) = stream.try_next().unwrap() {
            match event {
                SessionEvent::FrameRendered { sequence, .. } => frames.push(sequence),
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        assert_eq!(frames.len(), FRAME_EVENT_CAPACITY);
        assert_eq!(frames[0], 0);
    }

    #[tokio::test]
    async fn test_stream_ends_when_sink_dropped() {
        let (sink, mut stream) = EventSink::channel();
        sink.emit(SessionEvent::notify("bye", false));
        drop(sink);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        assert!(stream.try_next().is_err());
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(
            StopReason::CaptureFailed("encoder".to_string()).to_string(),
            "capture failed: encoder"
        );
        assert!(!StopReason::ChannelDisconnected.disconnects_channel());
        assert!(StopReason::Teardown.disconnects_channel());
    }
}
