//! Configuration module - layered settings loading

pub mod settings;

pub use settings::*;
