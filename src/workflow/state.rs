//! Workflow state: phases, captured images and published snapshots

use serde::Serialize;

use crate::backend::traits::{CorruptionRequest, CorruptionResult, CorruptionStrategy, IterationBudget};
use crate::config::WorkflowDefaults;
use crate::error::{AppError, Result};
use crate::media::{self, DataUrl, ImagePayload};

/// Where the workflow currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No corruption result; an image may or may not be loaded
    Idle,
    /// A corruption call is in flight
    Generating,
    /// A corruption result is available
    Ready,
    /// Detection on both images is in flight
    Comparing,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

/// The user-supplied image together with its display handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    payload: ImagePayload,
    display: DataUrl,
}

impl SourceImage {
    /// Capture a payload, deriving the display handle from it
    pub fn capture(payload: ImagePayload) -> Result<Self> {
        Self::check(&payload)?;
        let display = media::encode_to_displayable(&payload);
        Ok(Self { payload, display })
    }

    /// Capture a payload whose display handle was produced by the file picker
    pub fn from_parts(payload: ImagePayload, display: DataUrl) -> Result<Self> {
        Self::check(&payload)?;
        Ok(Self { payload, display })
    }

    fn check(payload: &ImagePayload) -> Result<()> {
        if !payload.is_image() {
            return Err(AppError::Precondition("Please upload an image file".to_string()));
        }
        Ok(())
    }

    pub fn payload(&self) -> &ImagePayload {
        &self.payload
    }

    pub fn display(&self) -> &DataUrl {
        &self.display
    }
}

/// Detection summaries for the original and the corrupted image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub original: String,
    pub corrupted: String,
}

/// Raw form values; parsed only when a corruption call is about to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowParams {
    pub model: String,
    pub iterations: String,
    pub strategy: String,
}

impl WorkflowParams {
    /// Build the request for a corruption call
    pub fn to_request(&self) -> Result<CorruptionRequest> {
        let model = self.model.trim();
        if model.is_empty() {
            return Err(AppError::Precondition("Please select a model".to_string()));
        }
        Ok(CorruptionRequest {
            model: model.to_string(),
            iterations: self.iterations.parse::<IterationBudget>()?,
            strategy: self.strategy.parse::<CorruptionStrategy>()?,
        })
    }
}

impl Default for WorkflowParams {
    fn default() -> Self {
        Self {
            model: "yolov8n".to_string(),
            iterations: IterationBudget::UseDefault.wire_value(),
            strategy: CorruptionStrategy::Vanishing.to_string(),
        }
    }
}

impl From<&WorkflowDefaults> for WorkflowParams {
    fn from(defaults: &WorkflowDefaults) -> Self {
        Self {
            model: defaults.model.clone(),
            iterations: defaults.iterations.clone(),
            strategy: defaults.strategy.clone(),
        }
    }
}

/// Mutable controller state
#[derive(Debug, Default)]
pub(crate) struct WorkflowState {
    /// Bumped on every generate and every capture
    pub epoch: u64,
    /// Bumped on every compare; only the latest compare may publish
    pub compare_ticket: u64,
    pub phase: Phase,
    pub source: Option<SourceImage>,
    pub corruption: Option<CorruptionResult>,
    pub detection: Option<DetectionResult>,
    pub params: WorkflowParams,
}

impl WorkflowState {
    pub fn new(params: WorkflowParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Drop the corruption result and everything derived from it
    pub fn clear_results(&mut self) {
        self.corruption = None;
        self.detection = None;
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            phase: self.phase,
            epoch: self.epoch,
            source: self.source.as_ref().map(|s| s.display().clone()),
            corruption: self.corruption.clone(),
            detection: self.detection.clone(),
            params: self.params.clone(),
        }
    }
}

/// Read-only view published to the rendering surface after every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowSnapshot {
    pub phase: Phase,
    pub epoch: u64,
    pub source: Option<DataUrl>,
    pub corruption: Option<CorruptionResult>,
    pub detection: Option<DetectionResult>,
    pub params: WorkflowParams,
}

impl WorkflowSnapshot {
    pub fn has_image(&self) -> bool {
        self.source.is_some()
    }
}
