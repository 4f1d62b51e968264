//! Image analysis API client
//!
//! Submits camera frames to the vision provider's object detection
//! endpoint and returns the detected objects with their pixel bounding
//! boxes and ranked tags. Only the fields the pipeline consumes are
//! modeled; everything else in the provider response is ignored.

use finsight_common::config::VisionConfig;
use finsight_common::Error;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error as ThisError;

const ANALYZE_PATH: &str = "/computervision/imageanalysis:analyze";
const API_VERSION: &str = "2023-10-01";
const USER_AGENT: &str = "finsight/0.1.0";

/// Vision client errors
#[derive(Debug, ThisError)]
pub enum VisionError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    /// Structured error payload from the provider (can arrive with any status)
    #[error("Provider error {code}: {message}")]
    ErrorPayload { code: String, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<VisionError> for Error {
    fn from(err: VisionError) -> Self {
        match err {
            // The provider rejects bad uploads with a typed error payload;
            // that is the caller's fault, not an upstream outage.
            VisionError::ErrorPayload { ref code, ref message }
                if code.contains("InvalidImage") || code.contains("InvalidRequest") =>
            {
                Error::InvalidInput(format!("Image rejected by analysis: {}", message))
            }
            VisionError::ParseError(detail) => Error::parse("vision analysis response", &detail),
            other => Error::upstream("vision", other.to_string()),
        }
    }
}

/// One detected object: a pixel-space bounding box plus ranked tags.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectedObject {
    #[serde(rename = "boundingBox")]
    pub bounding_box: Option<PixelBox>,
    #[serde(default)]
    pub tags: Vec<ObjectTag>,
}

/// Bounding box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PixelBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// A classification tag with the provider's confidence in [0.0, 1.0].
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectTag {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct VisionAnalysis {
    #[serde(rename = "objectsResult")]
    objects_result: Option<ObjectsResult>,
}

#[derive(Debug, Deserialize)]
struct ObjectsResult {
    #[serde(default)]
    values: Vec<DetectedObject>,
}

#[derive(Debug, Deserialize)]
struct VisionErrorBody {
    error: VisionErrorDetail,
}

#[derive(Debug, Deserialize)]
struct VisionErrorDetail {
    #[serde(default)]
    code: String,
    message: String,
}

/// Vision analysis API client
pub struct VisionClient {
    http_client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VisionError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
        })
    }

    /// Analyze an image and return all detected objects.
    ///
    /// Objects the provider found nothing noteworthy in come back as an
    /// empty list, not an error.
    pub async fn analyze(&self, image: &[u8]) -> Result<Vec<DetectedObject>, VisionError> {
        let url = format!(
            "{}{}?features=objects&api-version={}",
            self.endpoint, ANALYZE_PATH, API_VERSION
        );

        tracing::debug!(bytes = image.len(), "Submitting image for object detection");

        let response = self
            .http_client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| VisionError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VisionError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            // Non-success bodies usually carry a structured error; fall
            // back to the raw text when they don't.
            if let Ok(payload) = serde_json::from_str::<VisionErrorBody>(&body) {
                return Err(VisionError::ErrorPayload {
                    code: payload.error.code,
                    message: payload.error.message,
                });
            }
            return Err(VisionError::ApiError(status.as_u16(), body));
        }

        let objects = parse_analysis(&body)?;
        tracing::debug!(objects = objects.len(), "Object detection complete");
        Ok(objects)
    }
}

/// Parse an analysis response body into detected objects.
///
/// The provider reports failures inside a 200 body on occasion, so a
/// well-formed `{"error": ...}` payload is checked for first.
pub fn parse_analysis(body: &str) -> Result<Vec<DetectedObject>, VisionError> {
    if let Ok(payload) = serde_json::from_str::<VisionErrorBody>(body) {
        return Err(VisionError::ErrorPayload {
            code: payload.error.code,
            message: payload.error.message,
        });
    }

    let analysis: VisionAnalysis = serde_json::from_str(body)
        .map_err(|e| VisionError::ParseError(format!("Invalid analysis response: {}", e)))?;

    Ok(analysis
        .objects_result
        .map(|r| r.values)
        .unwrap_or_default())
}
