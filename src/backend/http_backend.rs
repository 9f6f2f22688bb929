//! HTTP multipart client for the corruption and detection endpoints

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{
    is_known_model, CorruptionRequest, CorruptionResult, CorruptionService, DetectionService,
};
use crate::config::ServiceConfig;
use crate::error::{AppError, Result};
use crate::media::{self, base64, ImagePayload};

/// Client for the model-serving endpoint
///
/// One instance serves both the corruption and the detection route. Every
/// call is a single multipart POST; nothing is retried.
pub struct HttpServiceClient {
    client: Client,
    base_url: String,
    corruption_path: String,
    detection_path: String,
    device: String,
    model_suffix: String,
}

/// Response body of the corruption route
#[derive(Debug, Deserialize)]
struct ApiCorruptionResponse {
    adv_image_base64: String,
    noise: String,
    #[serde(default)]
    #[allow(dead_code)]
    filename: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    format: Option<String>,
}

/// Response body of the detection route
#[derive(Debug, Deserialize)]
struct ApiDetectionResponse {
    result: String,
}

impl HttpServiceClient {
    /// Create a new client from configuration
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            corruption_path: config.corruption_path.clone(),
            detection_path: config.detection_path.clone(),
            device: config.device.clone(),
            model_suffix: config.model_suffix.clone(),
        })
    }

    pub fn corruption_url(&self) -> String {
        format!("{}{}", self.base_url, self.corruption_path)
    }

    pub fn detection_url(&self) -> String {
        format!("{}{}", self.base_url, self.detection_path)
    }

    /// Model name as the endpoint expects it, e.g. `yolov8n.pt`
    fn wire_model(&self, model: &str) -> Result<String> {
        let model = model.trim();
        if model.is_empty() {
            return Err(AppError::InvalidRequest("Model identifier cannot be empty".to_string()));
        }
        if !is_known_model(model) {
            warn!(model = %model, "Model is not in the known catalogue, passing through");
        }
        Ok(format!("{}{}", model, self.model_suffix))
    }

    fn file_part(image: &ImagePayload) -> Result<Part> {
        Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)
            .map_err(|e| {
                AppError::InvalidRequest(format!(
                    "Invalid content type '{}': {}",
                    image.content_type, e
                ))
            })
    }

    /// POST a multipart form and parse the JSON response
    async fn post_form<T: DeserializeOwned>(&self, url: &str, form: Form) -> Result<T> {
        let response = match self.client.post(url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return Err(AppError::Service(format!("Connection failed to {}: {}", url, e)));
            }
            Err(e) => return Err(AppError::HttpClient(e)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "Service returned non-success status");
            return Err(AppError::Service(format!(
                "Service returned {}: {}",
                status, body
            )));
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<T>(&body)
            .map_err(|e| AppError::Service(format!("Failed to parse response: {}", e)))
    }
}

/// Decode one base64 image field of a service response into a handle
fn decode_image_field(field: &str, value: &str) -> Result<media::DataUrl> {
    let bytes = base64::decode(value).map_err(|e| {
        AppError::Service(format!("Response field '{}' is unusable: {}", field, e))
    })?;
    if bytes.is_empty() {
        return Err(AppError::Service(format!("Response field '{}' is empty", field)));
    }
    Ok(media::encode_bytes_to_displayable(&bytes))
}

#[async_trait]
impl CorruptionService for HttpServiceClient {
    async fn submit_corruption(
        &self,
        image: &ImagePayload,
        request: &CorruptionRequest,
    ) -> Result<CorruptionResult> {
        image.ensure_image()?;
        let model = self.wire_model(&request.model)?;

        let url = self.corruption_url();
        debug!(
            url = %url,
            model = %model,
            n_iters = %request.iterations,
            ctype = %request.strategy,
            size = image.len(),
            "Sending corruption request"
        );

        let form = Form::new()
            .part("file", Self::file_part(image)?)
            .text("model", model)
            .text("device", self.device.clone())
            .text("n_iters", request.iterations.wire_value())
            .text("ctype", request.strategy.as_str());

        let api_response: ApiCorruptionResponse = self.post_form(&url, form).await?;

        Ok(CorruptionResult {
            adversarial: decode_image_field("adv_image_base64", &api_response.adv_image_base64)?,
            noise: decode_image_field("noise", &api_response.noise)?,
        })
    }
}

#[async_trait]
impl DetectionService for HttpServiceClient {
    async fn submit_detection(&self, image: &ImagePayload, model: &str) -> Result<String> {
        image.ensure_image()?;
        let model = self.wire_model(model)?;

        let url = self.detection_url();
        debug!(url = %url, model = %model, file = %image.file_name, "Sending detection request");

        let form = Form::new()
            .part("file", Self::file_part(image)?)
            .text("model", model);

        let api_response: ApiDetectionResponse = self.post_form(&url, form).await?;
        Ok(api_response.result)
    }
}
