//! Common error types for the adversarial workflow

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Coarse classification used when surfacing errors to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Workflow invoked out of order or with unusable user input
    Precondition,
    /// Remote endpoint unreachable, non-success status or malformed body
    Service,
    /// A displayable handle could not be turned back into bytes
    Decode,
    /// A service client was called with arguments it must never receive
    Contract,
    /// Local configuration or I/O failure
    Internal,
}

impl AppError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Precondition(_) => ErrorKind::Precondition,
            AppError::Service(_) | AppError::HttpClient(_) => ErrorKind::Service,
            AppError::Decode(_) => ErrorKind::Decode,
            AppError::InvalidRequest(_) => ErrorKind::Contract,
            AppError::Config(_) | AppError::Io(_) | AppError::Json(_) => ErrorKind::Internal,
        }
    }

    /// Short text suitable for a user-facing notification
    pub fn user_message(&self) -> String {
        match self {
            AppError::Precondition(msg) => msg.clone(),
            AppError::Service(_) | AppError::HttpClient(_) | AppError::Decode(_) => {
                format!("Error processing image. Please try again. ({})", self)
            }
            AppError::InvalidRequest(msg) => msg.clone(),
            _ => self.to_string(),
        }
    }

    pub fn is_precondition(&self) -> bool {
        self.kind() == ErrorKind::Precondition
    }

    pub fn is_service(&self) -> bool {
        self.kind() == ErrorKind::Service
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
