//! Image format detection from magic bytes

/// Detect image format from binary data using magic bytes
pub fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpeg");
    }

    // GIF: GIF87a or GIF89a
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("gif");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("webp");
    }

    // BMP: BM
    if data.starts_with(b"BM") {
        return Some("bmp");
    }

    None
}

/// MIME type for a sniffed image, if any
pub fn sniff_mime(data: &[u8]) -> Option<String> {
    detect_image_format(data).map(|format| format!("image/{}", format))
}

/// Whether `mime` is a bare `image/<subtype>` that can sit in a data URL header
pub fn is_image_mime(mime: &str) -> bool {
    match mime.strip_prefix("image/") {
        Some(subtype) => {
            !subtype.is_empty()
                && subtype
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// File extension conventionally used for a MIME type
pub fn extension_for_mime(mime: &str) -> &str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        other => other.strip_prefix("image/").unwrap_or("bin"),
    }
}

/// MIME type guessed from a file extension
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
