//! Application settings and configuration management

use crate::backend::traits::{CorruptionStrategy, IterationBudget};
use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub service: ServiceConfig,
    pub defaults: WorkflowDefaults,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Remote model-serving endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_corruption_path")]
    pub corruption_path: String,
    #[serde(default = "default_detection_path")]
    pub detection_path: String,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Execution target passed verbatim to the corruption endpoint
    #[serde(default = "default_device")]
    pub device: String,
    /// Appended to every model identifier sent over the wire
    #[serde(default = "default_model_suffix")]
    pub model_suffix: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_corruption_path() -> String {
    "/upload".to_string()
}

fn default_detection_path() -> String {
    "/detect".to_string()
}

fn default_timeout() -> u64 {
    300000
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_model_suffix() -> String {
    ".pt".to_string()
}

/// Initial workflow parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_iterations")]
    pub iterations: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_model() -> String {
    "yolov8n".to_string()
}

fn default_iterations() -> String {
    "-1".to_string()
}

fn default_strategy() -> String {
    "vanishing".to_string()
}

/// Storage configuration for exported images
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_output_dir() -> String {
    "./output".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("service.base_url", default_base_url())?
            .set_default("service.corruption_path", default_corruption_path())?
            .set_default("service.detection_path", default_detection_path())?
            .set_default("service.timeout_ms", default_timeout())?
            .set_default("service.device", default_device())?
            .set_default("service.model_suffix", default_model_suffix())?
            .set_default("defaults.model", default_model())?
            .set_default("defaults.iterations", default_iterations())?
            .set_default("defaults.strategy", default_strategy())?
            .set_default("storage.output_dir", default_output_dir())?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::from(path.as_ref()).required(false))
            // Override with environment variables (prefixed with ADV_WORKFLOW_)
            .add_source(
                Environment::with_prefix("ADV_WORKFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let service = &self.service;
        if service.base_url.is_empty() {
            return Err(invalid("Service base URL cannot be empty".to_string()));
        }
        if !service.base_url.starts_with("http://") && !service.base_url.starts_with("https://") {
            return Err(invalid(format!(
                "Service base URL '{}' must use http or https",
                service.base_url
            )));
        }
        for path in [&service.corruption_path, &service.detection_path] {
            if !path.starts_with('/') {
                return Err(invalid(format!("Endpoint path '{}' must start with '/'", path)));
            }
        }
        if service.timeout_ms == 0 {
            return Err(invalid("Service timeout cannot be 0".to_string()));
        }

        if self.defaults.model.trim().is_empty() {
            return Err(invalid("Default model cannot be empty".to_string()));
        }
        self.defaults
            .iterations
            .parse::<IterationBudget>()
            .map_err(|e| invalid(format!("Default iterations: {}", e)))?;
        self.defaults
            .strategy
            .parse::<CorruptionStrategy>()
            .map_err(|e| invalid(format!("Default strategy: {}", e)))?;

        if !["pretty", "json"].contains(&self.logging.format.as_str()) {
            return Err(invalid(format!(
                "Invalid log format '{}'. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(config::ConfigError::Message(message))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                base_url: default_base_url(),
                corruption_path: default_corruption_path(),
                detection_path: default_detection_path(),
                timeout_ms: default_timeout(),
                device: default_device(),
                model_suffix: default_model_suffix(),
            },
            defaults: WorkflowDefaults {
                model: default_model(),
                iterations: default_iterations(),
                strategy: default_strategy(),
            },
            storage: StorageConfig {
                output_dir: default_output_dir(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
        }
    }
}
