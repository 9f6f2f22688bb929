//! Workflow module - State machine driving corruption and detection

pub mod controller;
pub mod notify;
pub mod state;

pub use controller::{Outcome, WorkflowController};
pub use notify::{Notification, NotificationLevel, Notifier, TracingNotifier};
pub use state::{DetectionResult, Phase, SourceImage, WorkflowParams, WorkflowSnapshot};
