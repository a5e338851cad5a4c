//! JPEG data-URL codec
//!
//! Outbound frames travel as `data:image/jpeg;base64,<payload>` strings and
//! processed frames come back the same way. Decoding accepts any image format
//! the `image` crate was built with, since the service may answer in PNG.

use crate::error::{MediaError, MediaResult};
use crate::frame::VideoFrame;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// Prefix of every outbound frame
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Default encode quality on the 0.0..=1.0 scale
pub const DEFAULT_JPEG_QUALITY: f32 = 0.85;

/// Map a 0.0..=1.0 quality to the encoder's 1..=100 scale
pub fn jpeg_quality(quality: f32) -> u8 {
    if !quality.is_finite() {
        return (DEFAULT_JPEG_QUALITY * 100.0).round() as u8;
    }
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encode an image as a JPEG data URL
pub fn encode_data_url(image: &RgbImage, quality: f32) -> MediaResult<String> {
    let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality(quality));
    encoder
        .encode_image(image)
        .map_err(|e| MediaError::EncodingFailed {
            codec: "jpeg".to_string(),
            reason: e.to_string(),
        })?;

    let mut url = String::with_capacity(JPEG_DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    url.push_str(JPEG_DATA_URL_PREFIX);
    STANDARD.encode_string(&jpeg, &mut url);
    Ok(url)
}

/// Encode a frame as a JPEG data URL
pub fn encode_frame(frame: &VideoFrame, quality: f32) -> MediaResult<String> {
    encode_data_url(&frame.to_image()?, quality)
}

/// Decode a base64 image data URL into an RGB frame
pub fn decode_data_url(url: &str) -> MediaResult<VideoFrame> {
    let bytes = data_url_bytes(url)?;
    let image = image::load_from_memory(&bytes).map_err(|e| decode_error(e.to_string()))?;
    Ok(VideoFrame::from_image(image.to_rgb8(), 0))
}

fn data_url_bytes(url: &str) -> MediaResult<Vec<u8>> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| decode_error("not a data URL".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| decode_error("data URL has no payload".to_string()))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default();
    if !mime.starts_with("image/") {
        return Err(decode_error(format!("unexpected media type '{}'", mime)));
    }
    if !parts.any(|part| part == "base64") {
        return Err(decode_error("data URL is not base64".to_string()));
    }
    if payload.is_empty() {
        return Err(decode_error("empty payload".to_string()));
    }

    STANDARD
        .decode(payload.trim())
        .map_err(|e| decode_error(format!("invalid base64: {}", e)))
}

fn decode_error(reason: String) -> MediaError {
    MediaError::DecodingFailed {
        codec: "data-url".to_string(),
        reason,
    }
}
