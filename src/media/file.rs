//! File capture and download handling for workflow images

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::media::{format, DataUrl, ImagePayload};

/// Platform save mechanism for displayable images
#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Persist `handle` under `suggested_name`, returning where it went
    async fn save(&self, handle: &DataUrl, suggested_name: &str) -> Result<PathBuf>;
}

/// Read an image from disk into a payload
///
/// The content type comes from the magic bytes, falling back to the
/// file extension.
pub async fn read_image<P: AsRef<Path>>(path: P) -> Result<ImagePayload> {
    let path = path.as_ref();
    let bytes = fs::read(path).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());

    let content_type = format::sniff_mime(&bytes)
        .or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(format::mime_for_extension)
                .map(String::from)
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    debug!(path = ?path, size = bytes.len(), content_type = %content_type, "Read image file");

    Ok(ImagePayload::with_content_type(bytes, file_name, content_type))
}

/// Download sink that writes images into a directory
pub struct FileDownloader {
    output_dir: PathBuf,
}

impl FileDownloader {
    /// Create a new downloader rooted at `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Ensure the output directory exists
    pub async fn ensure_output_dir(&self) -> Result<()> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir).await?;
            debug!(path = ?self.output_dir, "Created output directory");
        }
        Ok(())
    }

    /// Get the full path for a filename
    pub fn get_path(&self, filename: &str) -> PathBuf {
        self.output_dir.join(filename)
    }
}

#[async_trait]
impl DownloadSink for FileDownloader {
    async fn save(&self, handle: &DataUrl, suggested_name: &str) -> Result<PathBuf> {
        // Only the final component is honored so a name cannot escape the directory
        let filename = Path::new(suggested_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AppError::InvalidRequest(format!("Invalid download name '{}'", suggested_name))
            })?;

        self.ensure_output_dir().await?;

        let data = handle.decode()?;
        let file_path = self.get_path(&filename);
        fs::write(&file_path, &data).await?;

        debug!(path = ?file_path, size = data.len(), "Saved image file");

        Ok(file_path)
    }
}
