//! # Slidecast Media
//!
//! Camera sources, the fixed-size transmit buffer, the JPEG data-URL codec,
//! asynchronous decode of processed frames and the output surface they are
//! rendered to, plus the resource manager that releases all of it.

#![warn(clippy::all)]

pub mod buffer;
pub mod capture;
pub mod codec;
pub mod decode;
pub mod error;
pub mod frame;
pub mod render;
pub mod resources;

// Re-export main types
pub use buffer::{FrameBuffer, SharedFrameBuffer};
#[cfg(feature = "native-camera")]
pub use capture::NativeCamera;
pub use capture::{
    acquire_camera, list_cameras, CameraConstraints, CameraHandle, CameraInfo, CameraSelection,
    CameraSource, SyntheticCamera,
};
pub use codec::{
    decode_data_url, encode_data_url, encode_frame, jpeg_quality, DEFAULT_JPEG_QUALITY,
    JPEG_DATA_URL_PREFIX,
};
pub use decode::{DecodeCanceller, DecodeOutcome, DecodeQueue, DEFAULT_DECODE_CAPACITY};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use frame::{Resolution, VideoFrame};
pub use render::{NullSink, OutputSurface, SharedOutputSurface, SnapshotSink, SurfaceSink};
pub use resources::{MediaResources, ReleaseReport};
