//! Common traits and types for the remote model-serving services

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::media::{self, format, DataUrl, ImagePayload};

/// Detector identifiers the serving endpoint is known to host
pub const KNOWN_MODELS: &[&str] = &[
    "yolov8n", "yolov8s", "yolov8m", "yolov8l", "yolov8x",
    "yolov11n", "yolov11s", "yolov11m", "yolov11l", "yolov11x",
];

/// Whether `model` is in [`KNOWN_MODELS`]
pub fn is_known_model(model: &str) -> bool {
    KNOWN_MODELS.contains(&model)
}

/// Iteration budget for the perturbation search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationBudget {
    /// Let the service pick its default (`-1` on the wire)
    UseDefault,
    /// Search for the minimal perturbation (`min` on the wire, opaque to us)
    SearchMinimum,
    /// Run exactly this many iterations
    Fixed(NonZeroU64),
}

impl IterationBudget {
    /// The string sent in the `n_iters` form field
    pub fn wire_value(&self) -> String {
        match self {
            Self::UseDefault => "-1".to_string(),
            Self::SearchMinimum => "min".to_string(),
            Self::Fixed(n) => n.to_string(),
        }
    }
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self::UseDefault
    }
}

impl fmt::Display for IterationBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_value())
    }
}

impl FromStr for IterationBudget {
    type Err = AppError;

    /// Accepts `-1`, `min`, or a positive integer. `min` is matched exactly.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "-1" {
            return Ok(Self::UseDefault);
        }
        if s == "min" {
            return Ok(Self::SearchMinimum);
        }
        s.parse::<NonZeroU64>().map(Self::Fixed).map_err(|_| {
            AppError::Precondition(format!(
                "Invalid number of iterations '{}': enter -1, a positive number, or 'min'",
                s
            ))
        })
    }
}

/// Perturbation objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptionStrategy {
    /// Suppress detections
    Vanishing,
    /// Induce false detections
    Fabrication,
}

impl CorruptionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vanishing => "vanishing",
            Self::Fabrication => "fabrication",
        }
    }
}

impl Default for CorruptionStrategy {
    fn default() -> Self {
        Self::Vanishing
    }
}

impl fmt::Display for CorruptionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorruptionStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "vanishing" => Ok(Self::Vanishing),
            "fabrication" => Ok(Self::Fabrication),
            other => Err(AppError::Precondition(format!(
                "Unknown corruption type '{}': expected 'vanishing' or 'fabrication'",
                other
            ))),
        }
    }
}

/// Parameters for one corruption call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionRequest {
    /// Model identifier, without the serving suffix
    pub model: String,

    /// Iteration budget
    pub iterations: IterationBudget,

    /// Corruption strategy
    pub strategy: CorruptionStrategy,
}

/// Adversarial image and the noise that produced it, both ready to display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionResult {
    pub adversarial: DataUrl,
    pub noise: DataUrl,
}

/// Remote endpoint that turns an image into an adversarial one
#[async_trait]
pub trait CorruptionService: Send + Sync {
    /// Submit `image` for corruption. Performs no retries.
    async fn submit_corruption(
        &self,
        image: &ImagePayload,
        request: &CorruptionRequest,
    ) -> Result<CorruptionResult>;
}

/// Remote endpoint that runs object detection on an image
#[async_trait]
pub trait DetectionService: Send + Sync {
    /// Submit `image` for detection, returning a textual summary
    async fn submit_detection(&self, image: &ImagePayload, model: &str) -> Result<String>;

    /// Decode `handle` into a payload under a synthetic name and detect on it
    async fn submit_detection_from_displayable(
        &self,
        handle: &DataUrl,
        model: &str,
    ) -> Result<String> {
        let name = format!("adversarial.{}", format::extension_for_mime(handle.mime()));
        let payload = media::decode_data_url(handle, &name)?;
        self.submit_detection(&payload, model).await
    }
}
