//! Backend module - Service contracts and the HTTP client implementing them

pub mod http_backend;
pub mod traits;

pub use http_backend::HttpServiceClient;
pub use traits::{
    CorruptionRequest, CorruptionResult, CorruptionService, CorruptionStrategy, DetectionService,
    IterationBudget, KNOWN_MODELS,
};
