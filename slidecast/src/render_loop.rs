//! Inbound frame handling
//!
//! Validates `processed_frame` payloads, updates the slide counters, hands
//! the frame to the decode queue and presents whatever the queue reports
//! ready. Service `error` events are surfaced without touching anything else.

use crate::event::{EventSink, SessionEvent};
use crate::slides::SlideTracker;
use serde_json::Value;
use slidecast_core::{ProcessedFrame, ServiceErrorPayload};
use slidecast_diagnostics::{RelayCounter, RelayStats};
use slidecast_media::{DecodeOutcome, DecodeQueue, SharedOutputSurface};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receive side of a session
pub(crate) struct RenderLoop {
    decode: DecodeQueue,
    surface: SharedOutputSurface,
    slides: SlideTracker,
    stats: Arc<RelayStats>,
    events: EventSink,
}

impl RenderLoop {
    pub(crate) fn new(
        decode: DecodeQueue,
        surface: SharedOutputSurface,
        slides: SlideTracker,
        stats: Arc<RelayStats>,
        events: EventSink,
    ) -> Self {
        Self {
            decode,
            surface,
            slides,
            stats,
            events,
        }
    }

    /// Handle a `processed_frame` payload; returns the decode sequence
    pub(crate) fn handle_frame(&mut self, payload: &Value) -> Option<u64> {
        self.stats.record(RelayCounter::FramesReceived);

        let frame = match ProcessedFrame::from_payload(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Invalid frame data received: {}", e);
                self.stats.record(RelayCounter::MalformedMessages);
                return None;
            }
        };

        if let Some(counters) = frame.slides {
            if self.slides.update(counters) {
                if let Some(slides) = self.slides.current() {
                    debug!(slide = %slides, "Slide changed");
                    self.events.emit(SessionEvent::SlidesChanged { slides });
                }
            }
        }

        Some(self.decode.submit(frame.frame))
    }

    /// Handle an `error` payload from the service
    pub(crate) fn handle_service_error(&mut self, payload: &Value) {
        let error = ServiceErrorPayload::from_payload(payload);
        warn!("Service error: {}", error.message);
        self.stats.record(RelayCounter::ServiceErrors);
        self.events.emit(SessionEvent::ServiceError {
            message: error.message,
        });
    }

    /// Present a finished decode
    pub(crate) fn handle_outcome(&mut self, outcome: DecodeOutcome) {
        match outcome {
            DecodeOutcome::Ready { sequence, frame } => {
                let resolution = frame.resolution();
                match self.surface.lock().present(&frame) {
                    Ok(true) => {
                        self.stats.record(RelayCounter::FramesRendered);
                        self.events
                            .emit(SessionEvent::FrameRendered { sequence, resolution });
                    }
                    Ok(false) => {}
                    Err(e) => warn!(sequence, "Display update error: {}", e),
                }
            }
            DecodeOutcome::Failed { sequence, error } => {
                warn!(sequence, "Image loading error: {}", error);
                self.stats.record(RelayCounter::DecodeFailures);
            }
            DecodeOutcome::Stale { sequence } => {
                debug!(sequence, "Dropping stale decode");
                self.stats.record(RelayCounter::StaleDecodes);
            }
        }
    }

    /// Run until the frame queue closes
    pub(crate) async fn run(
        mut self,
        mut frames: mpsc::UnboundedReceiver<Value>,
        mut service_errors: mpsc::UnboundedReceiver<Value>,
    ) {
        info!("Render loop started");
        loop {
            tokio::select! {
                payload = frames.recv() => match payload {
                    Some(payload) => {
                        self.handle_frame(&payload);
                    }
                    None => break,
                },
                Some(payload) = service_errors.recv() => {
                    self.handle_service_error(&payload);
                }
                outcome = self.decode.next_outcome() => {
                    self.handle_outcome(outcome);
                }
            }
        }
        debug!("Render loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStream;
    use serde_json::json;
    use slidecast_media::{encode_frame, OutputSurface, Resolution, VideoFrame};

    fn render_loop() -> (RenderLoop, SharedOutputSurface, EventStream) {
        let surface = OutputSurface::shared(Box::new(slidecast_media::NullSink));
        surface.lock().attach();
        let (events, stream) = EventSink::channel();
        let render = RenderLoop::new(
            DecodeQueue::default(),
            surface.clone(),
            SlideTracker::new(),
            Arc::new(RelayStats::new()),
            events,
        );
        (render, surface, stream)
    }

    fn frame_url(width: u32, height: u32) -> String {
        encode_frame(&VideoFrame::blank(Resolution::new(width, height)), 0.85).unwrap()
    }

    #[tokio::test]
    async fn test_frame_updates_slides_and_surface() {
        let (mut render, surface, mut events) = render_loop();

        let payload = json!({
            "frame": frame_url(48, 36),
            "currentSlide": 2,
            "totalSlides": 10
        });
        assert!(render.handle_frame(&payload).is_some());
        assert_eq!(render.slides.display(), "3 / 10");
        assert!(matches!(
            events.next().await,
            Some(SessionEvent::SlidesChanged { .. })
        ));

        let outcome = render.decode.next_outcome().await;
        render.handle_outcome(outcome);
        assert_eq!(surface.lock().dimensions(), Some(Resolution::new(48, 36)));
        assert!(matches!(
            events.next().await,
            Some(SessionEvent::FrameRendered { .. })
        ));
    }

    #[tokio::test]
    async fn test_surface_ends_on_newest_frame() {
        let (mut render, surface, _events) = render_loop();

        // The large frame takes longer to decode than the small one after it.
        render.handle_frame(&json!({ "frame": frame_url(1280, 960) }));
        let newest = render
            .handle_frame(&json!({ "frame": frame_url(40, 30) }))
            .unwrap();

        let mut rendered = Vec::new();
        while render.decode.in_flight() > 0 {
            let outcome = render.decode.next_outcome().await;
            if let DecodeOutcome::Ready { sequence, .. } = &outcome {
                rendered.push(*sequence);
            }
            render.handle_outcome(outcome);
        }

        assert_eq!(rendered.last(), Some(&newest));
        assert!(rendered.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(surface.lock().dimensions(), Some(Resolution::new(40, 30)));
        assert_eq!(
            render.stats.get(RelayCounter::FramesRendered) + render.stats.get(RelayCounter::StaleDecodes),
            2
        );
    }

    #[tokio::test]
    async fn test_missing_frame_is_ignored() {
        let (mut render, surface, mut events) = render_loop();

        assert!(render
            .handle_frame(&json!({"currentSlide": 4, "totalSlides": 9}))
            .is_none());
        assert!(render.handle_frame(&json!({"frame": ""})).is_none());

        assert_eq!(render.slides.current(), None);
        assert!(surface.lock().dimensions().is_none());
        assert_eq!(render.stats.get(RelayCounter::MalformedMessages), 2);
        assert!(events.try_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_without_counters_keeps_slides() {
        let (mut render, _surface, _events) = render_loop();

        render.handle_frame(&json!({
            "frame": frame_url(8, 8),
            "currentSlide": 1,
            "totalSlides": 5
        }));
        render.handle_frame(&json!({ "frame": frame_url(8, 8) }));
        assert_eq!(render.slides.display(), "2 / 5");
    }

    #[tokio::test]
    async fn test_service_error_is_reported() {
        let (mut render, _surface, mut events) = render_loop();

        render.handle_service_error(&json!({"message": "Invalid frame data"}));
        match events.next().await {
            Some(SessionEvent::ServiceError { message }) => {
                assert_eq!(message, "Invalid frame data")
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
