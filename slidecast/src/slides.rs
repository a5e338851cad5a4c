//! Slide counters reported by the service

use serde::{Deserialize, Serialize};
use slidecast_core::SlideCounters;
use std::fmt;
use tokio::sync::watch;

/// Current position in the presented document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideState {
    /// Zero-based current slide
    pub current_slide: u32,
    /// Number of slides
    pub total_slides: u32,
}

impl SlideState {
    /// One-based slide number as shown to the user
    pub fn display_number(&self) -> u32 {
        self.current_slide.saturating_add(1)
    }
}

impl From<SlideCounters> for SlideState {
    fn from(counters: SlideCounters) -> Self {
        Self {
            current_slide: counters.current_slide,
            total_slides: counters.total_slides,
        }
    }
}

impl fmt::Display for SlideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.display_number(), self.total_slides)
    }
}

/// Shared slide state; only service data changes it
///
/// Survives disconnects and stops; nothing but a new `processed_frame`
/// replaces it.
#[derive(Debug, Clone)]
pub struct SlideTracker {
    state: std::sync::Arc<watch::Sender<Option<SlideState>>>,
}

impl Default for SlideTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SlideTracker {
    /// No counters known yet
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: std::sync::Arc::new(state),
        }
    }

    /// Replace both counters at once; returns whether anything changed
    pub fn update(&self, counters: SlideCounters) -> bool {
        let next = SlideState::from(counters);
        self.state.send_if_modified(|state| {
            if *state == Some(next) {
                false
            } else {
                *state = Some(next);
                true
            }
        })
    }

    /// Latest counters
    pub fn current(&self) -> Option<SlideState> {
        *self.state.borrow()
    }

    /// Text for the counter display, `-` while unknown
    pub fn display(&self) -> String {
        match self.current() {
            Some(state) => state.to_string(),
            None => "- / -".to_string(),
        }
    }

    /// Watch for changes
    pub fn subscribe(&self) -> watch::Receiver<Option<SlideState>> {
        self.state.subscribe()
    }
}
