//! Base64 and data URL encoding utilities

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::format;
use crate::error::{AppError, Result};

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a bare base64 string to binary data
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::Decode(format!("Invalid base64 data: {}", e)))
}

/// Check if a string is valid base64
pub fn is_valid(data: &str) -> bool {
    STANDARD.decode(data.trim()).is_ok()
}

/// An image embedded as a `data:image/...;base64,...` URL
///
/// This is the displayable handle handed to rendering surfaces. It can only be
/// constructed from bytes or by parsing a well-formed image data URL, so every
/// value decodes back to the bytes it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataUrl {
    raw: String,
    // Byte offset of the base64 payload within `raw`
    payload_start: usize,
}

impl DataUrl {
    /// Build a data URL for the given bytes and MIME type
    ///
    /// A MIME type that is not a bare `image/<subtype>` is replaced by the one
    /// sniffed from `data`, or by `image/jpeg` when nothing matches.
    pub fn from_bytes(data: &[u8], mime: &str) -> Self {
        let mime = if format::is_image_mime(mime) {
            mime.to_string()
        } else {
            format::sniff_mime(data).unwrap_or_else(|| super::FALLBACK_MIME.to_string())
        };
        let header = format!("{}{}{},", DATA_PREFIX, mime, BASE64_MARKER);
        let payload_start = header.len();
        let mut raw = header;
        raw.push_str(&encode(data));
        Self { raw, payload_start }
    }

    /// Parse a data URL, requiring an `image/*` MIME type and base64 payload
    pub fn parse(input: &str) -> Result<Self> {
        let rest = input
            .strip_prefix(DATA_PREFIX)
            .ok_or_else(|| AppError::Decode("Handle is not a data URL".to_string()))?;

        let comma = rest
            .find(',')
            .ok_or_else(|| AppError::Decode("Data URL has no payload separator".to_string()))?;
        let header = &rest[..comma];

        let mime = header.strip_suffix(BASE64_MARKER).ok_or_else(|| {
            AppError::Decode(format!("Data URL '{}' is not base64 encoded", header))
        })?;
        if !format::is_image_mime(mime) {
            return Err(AppError::Decode(format!(
                "Data URL MIME type '{}' is not an image type",
                mime
            )));
        }

        let payload_start = DATA_PREFIX.len() + comma + 1;
        if !is_valid(&input[payload_start..]) {
            return Err(AppError::Decode("Data URL payload is not valid base64".to_string()));
        }

        Ok(Self {
            raw: input.to_string(),
            payload_start,
        })
    }

    /// MIME type declared in the header, e.g. `image/jpeg`
    pub fn mime(&self) -> &str {
        let header = &self.raw[DATA_PREFIX.len()..self.payload_start - 1];
        header.strip_suffix(BASE64_MARKER).unwrap_or(header)
    }

    /// Image format suffix taken from the MIME type, e.g. `jpeg`
    pub fn format(&self) -> &str {
        self.mime().trim_start_matches("image/")
    }

    /// The base64 payload without its header
    pub fn payload(&self) -> &str {
        &self.raw[self.payload_start..]
    }

    /// Decode the payload back into bytes
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode(self.payload())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for DataUrl {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DataUrl> for String {
    fn from(value: DataUrl) -> Self {
        value.raw
    }
}

impl std::str::FromStr for DataUrl {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
