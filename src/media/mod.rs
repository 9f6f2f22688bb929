//! Media module - image payloads and the displayable-handle codec

pub mod base64;
pub mod file;
pub mod format;

pub use self::base64::DataUrl;

use crate::error::{AppError, Result};

/// MIME type assumed for encoded images whose bytes cannot be sniffed.
/// The corruption endpoint always emits JPEG.
pub const FALLBACK_MIME: &str = "image/jpeg";

/// Binary image data ready for submission to a remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

impl ImagePayload {
    /// Create a payload, inferring the content type from the bytes
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let content_type =
            format::sniff_mime(&bytes).unwrap_or_else(|| "application/octet-stream".to_string());
        Self {
            bytes,
            file_name: file_name.into(),
            content_type,
        }
    }

    /// Create a payload with an explicit content type
    pub fn with_content_type(
        bytes: Vec<u8>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether this payload is recognizably an image, either by its
    /// declared content type or by its magic bytes
    pub fn is_image(&self) -> bool {
        !self.bytes.is_empty()
            && (self.content_type.starts_with("image/")
                || format::detect_image_format(&self.bytes).is_some())
    }

    /// Fail with `InvalidRequest` unless this is a non-empty image
    pub fn ensure_image(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "Image '{}' is empty",
                self.file_name
            )));
        }
        if !self.is_image() {
            return Err(AppError::InvalidRequest(format!(
                "'{}' ({}) is not a recognized image type",
                self.file_name, self.content_type
            )));
        }
        Ok(())
    }
}

/// Produce a handle that can be embedded directly in a rendering surface
///
/// The declared content type is kept only when it is a bare `image/<subtype>`.
pub fn encode_to_displayable(payload: &ImagePayload) -> DataUrl {
    DataUrl::from_bytes(&payload.bytes, &payload.content_type)
}

/// Encode raw service output, sniffing its MIME type
pub fn encode_bytes_to_displayable(bytes: &[u8]) -> DataUrl {
    DataUrl::from_bytes(bytes, "")
}

/// Rebuild a binary payload from a handle, suitable for re-submission
///
/// Fails with `Decode` if `handle` is not a well-formed image data URL.
pub fn decode_from_displayable(handle: &str, suggested_name: &str) -> Result<ImagePayload> {
    let url = DataUrl::parse(handle)?;
    decode_data_url(&url, suggested_name)
}

/// Same as [`decode_from_displayable`] for an already-parsed handle
pub fn decode_data_url(url: &DataUrl, suggested_name: &str) -> Result<ImagePayload> {
    let bytes = url.decode()?;
    Ok(ImagePayload::with_content_type(bytes, suggested_name, url.mime()))
}
