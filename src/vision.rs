//! Client for the image prediction service.
//!
//! Photos are posted as raw bytes to a Custom Vision style prediction
//! endpoint, which answers with a list of `(tag, probability)` pairs for the
//! requested project iteration.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A project/iteration pair identifying one trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRef {
    pub project_id: Uuid,
    pub iteration_id: Uuid,
}

impl ModelRef {
    pub fn new(project_id: Uuid, iteration_id: Uuid) -> Self {
        Self {
            project_id,
            iteration_id,
        }
    }
}

/// One tag returned by the prediction service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TagPrediction {
    #[serde(rename = "tagName", alias = "TagName", alias = "Tag")]
    pub tag_name: String,
    #[serde(alias = "Probability")]
    pub probability: f64,
}

impl TagPrediction {
    pub fn new(tag_name: impl Into<String>, probability: f64) -> Self {
        Self {
            tag_name: tag_name.into(),
            probability,
        }
    }
}

/// Anything that can turn image bytes into tag probabilities.
///
/// Implementations are shared between ingestion workers, so they must be
/// callable from several threads at once.
pub trait Classifier: Send + Sync {
    fn classify(&self, image: &[u8], model: &ModelRef) -> Result<Vec<TagPrediction>, VisionError>;
}

/// Prediction client error types.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Client could not be constructed
    #[error("Vision config error: {0}")]
    Config(String),
    /// Network/HTTP error
    #[error("Vision network error: {0}")]
    Network(String),
    /// Service returned an error response
    #[error("Vision service error ({status}): {message}")]
    Service { status: u16, message: String },
    /// Response body could not be decoded
    #[error("Vision response error: {0}")]
    Decode(String),
}

/// Connection settings for the prediction service.
#[derive(Debug, Clone)]
pub struct VisionEndpoint {
    /// Base URL, without a trailing slash
    pub base_url: String,
    /// Key sent in the `Prediction-Key` header
    pub prediction_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl VisionEndpoint {
    pub fn new(base_url: impl Into<String>, prediction_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            prediction_key: prediction_key.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the image prediction URL for a model.
    pub fn predict_url(&self, model: &ModelRef) -> String {
        format!(
            "{}/customvision/v1.1/Prediction/{}/image?iterationId={}",
            self.base_url, model.project_id, model.iteration_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct ImagePrediction {
    #[serde(default, alias = "Predictions")]
    predictions: Vec<TagPrediction>,
}

/// Async client for the prediction service.
pub struct VisionClient {
    endpoint: VisionEndpoint,
    client: reqwest::Client,
}

impl VisionClient {
    /// Create a new prediction client.
    pub fn new(endpoint: VisionEndpoint) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| VisionError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { endpoint, client })
    }

    /// Classify one image against a model.
    pub async fn predict_image(
        &self,
        image: &[u8],
        model: &ModelRef,
    ) -> Result<Vec<TagPrediction>, VisionError> {
        let response = self
            .client
            .post(self.endpoint.predict_url(model))
            .header("Prediction-Key", &self.endpoint.prediction_key)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| VisionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VisionError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let prediction: ImagePrediction = response
            .json()
            .await
            .map_err(|e| VisionError::Decode(e.to_string()))?;

        Ok(prediction.predictions)
    }
}

/// Blocking prediction client for the ingestion threads.
pub struct BlockingVisionClient {
    inner: VisionClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingVisionClient {
    /// Create a new blocking prediction client.
    pub fn new(endpoint: VisionEndpoint) -> Result<Self, VisionError> {
        // Several ingestion workers may block on this runtime at the same time.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| VisionError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: VisionClient::new(endpoint)?,
            runtime,
        })
    }
}

impl Classifier for BlockingVisionClient {
    fn classify(&self, image: &[u8], model: &ModelRef) -> Result<Vec<TagPrediction>, VisionError> {
        self.runtime.block_on(self.inner.predict_image(image, model))
    }
}
