//! Image payload: raw bytes plus the MIME label sent with them.
//!
//! The bytes are forwarded untouched; the only decision made here is which
//! `mime_type` accompanies the base64 data in the request. By default that is
//! a fixed label ([`DEFAULT_MIME_TYPE`]). With `detect_mime_type` enabled
//! the magic bytes are checked first and the fixed label is the fallback.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::debug;

/// Label used when no other MIME type is configured or detected.
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Image bytes ready to be sent to a vision model.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Label the bytes with the detected format, or `fallback` if the magic
    /// bytes are not recognised.
    pub fn detect(bytes: impl Into<Arc<[u8]>>, fallback: &str) -> Self {
        let bytes = bytes.into();
        let mime_type = sniff_mime_type(&bytes).unwrap_or(fallback);
        Self::new(bytes, mime_type)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Standard base64 of the bytes, as `inline_data.data` expects.
    pub fn to_base64(&self) -> String {
        let b64 = STANDARD.encode(&self.bytes);
        debug!("Encoded image → {} bytes base64", b64.len());
        b64
    }
}

/// MIME type from magic bytes, if the `image` crate recognises the format.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF\0";

    #[test]
    fn base64_round_trips() {
        let payload = ImagePayload::new(b"hello image".to_vec(), DEFAULT_MIME_TYPE);
        let decoded = STANDARD.decode(payload.to_base64()).expect("valid base64");
        assert_eq!(decoded, b"hello image");
    }

    #[test]
    fn fixed_label_is_not_validated() {
        let payload = ImagePayload::new(JPEG_MAGIC.to_vec(), DEFAULT_MIME_TYPE);
        assert_eq!(payload.mime_type(), "image/png");
    }

    #[test]
    fn detect_recognises_png_and_jpeg() {
        assert_eq!(sniff_mime_type(PNG_MAGIC), Some("image/png"));
        assert_eq!(sniff_mime_type(JPEG_MAGIC), Some("image/jpeg"));
        assert_eq!(
            ImagePayload::detect(JPEG_MAGIC.to_vec(), DEFAULT_MIME_TYPE).mime_type(),
            "image/jpeg"
        );
    }

    #[test]
    fn detect_falls_back_for_unknown_bytes() {
        let payload = ImagePayload::detect(b"not an image".to_vec(), "image/webp");
        assert_eq!(payload.mime_type(), "image/webp");
        assert_eq!(payload.len(), 12);
    }
}
