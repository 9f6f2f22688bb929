//! Adversarial Image Workflow
//!
//! Client-side orchestration for generating adversarial images on a remote
//! model-serving endpoint and comparing object detection results on the
//! original and the corrupted image.

pub mod backend;
pub mod config;
pub mod error;
pub mod media;
pub mod workflow;

pub use error::{AppError, ErrorKind, Result};
pub use workflow::WorkflowController;
