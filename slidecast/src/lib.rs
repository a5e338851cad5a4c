//! # Slidecast - Camera Relay for Gesture-Driven Presentations
//!
//! Slidecast streams a live camera feed to a remote processing service over a
//! Socket.IO channel and renders the annotated frames the service sends back,
//! together with the slide counters it reports.
//!
//! ## Key Features
//!
//! - **Rate-limited capture**: frames are scaled to a fixed size, JPEG-encoded
//!   and sent no faster than the configured frame rate
//! - **Latest frame wins**: inbound frames decode off the async runtime and
//!   stale decodes never overwrite newer ones
//! - **Single cleanup path**: stop, disconnect, failure and Ctrl-C all release
//!   the camera and buffers the same way
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slidecast::{RelayConfig, Session, SessionEvent};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (session, mut events) = Session::connect(RelayConfig::default())?;
//!
//!     session.upload_and_start(Path::new("deck.pptx")).await?;
//!
//!     while let Some(event) = events.next().await {
//!         if let SessionEvent::SlidesChanged { slides } = event {
//!             println!("Slide {}", slides);
//!         }
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub use slidecast_core::{
    Channel, ChannelEvent, ChannelOptions, ChannelState, DisconnectReason, RelayError,
    RelayResult, SlideCounters, TransportMode,
};
pub use slidecast_diagnostics::{DebugLogger, RelayCounter, RelayStatsSnapshot};
pub use slidecast_media::{CameraConstraints, CameraInfo, CameraSelection, Resolution};

pub mod capture_loop;
pub mod config;
pub mod event;
mod render_loop;
pub mod session;
pub mod slides;
pub mod upload;

pub use capture_loop::{CaptureLoop, FrameGate, FrameTransport, ProcessingToken, StepOutcome};
pub use config::{CaptureConfig, OutputConfig, RelayConfig, UploadConfig, DEFAULT_ENDPOINT};
pub use event::{EventStream, SessionEvent, StopReason, FRAME_EVENT_CAPACITY};
pub use session::{Session, SessionState};
pub use slides::{SlideState, SlideTracker};
pub use upload::{DocumentUploader, UploadClient, UploadReceipt};
