//! Queue wire contracts
//!
//! The payload shapes that cross queue boundaries between the dispatcher
//! and the workers. Field names here are the wire contract (camelCase,
//! including the historical `imageToEnriche` spelling); do not rename.
//! Payloads travel base64-encoded over the queue; [`encode_payload`] and
//! [`decode_payload`] are the only sanctioned envelope codec.

use crate::{Error, Result};
use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Queue carrying cutting jobs from the dispatcher to the cropper
pub const QUEUE_CUTTING: &str = "image-cutting";

/// Queue carrying enrichment jobs from the cropper to the enricher
pub const QUEUE_ENRICHMENT: &str = "image-enrichment";

/// Pixel-space bounding box reported by the vision service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// One accepted vision detection, carried inside a cutting job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "tagName")]
    pub tag_name: String,
    /// Top tag confidence, in [0,1]
    pub confidence: f64,
    #[serde(rename = "boundingBox")]
    pub bounding_box: BoundingBox,
}

/// One raw image awaiting per-detection cropping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuttingJob {
    #[serde(rename = "fishData")]
    pub fish_data: Vec<Detection>,
    /// Storage key of the raw image under the `pre-cut/` namespace
    pub image: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

/// One stored crop awaiting species enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentJob {
    /// Storage key of the crop under the `post-cut/<deviceId>/` namespace
    #[serde(rename = "imageToEnriche")]
    pub image_to_enrich: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

/// Serialize a job payload to its base64 queue envelope
pub fn encode_payload<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| Error::Internal(format!("Payload serialization failed: {}", e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Decode a base64 queue envelope back into a job payload.
///
/// Both a bad base64 wrapper and malformed JSON inside it are parse
/// errors: redelivering the message would fail identically, so callers
/// drop rather than retry.
pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| Error::parse("queue payload base64", payload))?;
    let text = String::from_utf8_lossy(&bytes);
    serde_json::from_str(&text).map_err(|_| Error::parse("queue payload json", &text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> CuttingJob {
        CuttingJob {
            fish_data: vec![Detection {
                tag_name: "salmon".to_string(),
                confidence: 0.9,
                bounding_box: BoundingBox {
                    left: 0.0,
                    top: 0.0,
                    width: 50.0,
                    height: 50.0,
                },
            }],
            image: "pre-cut/1700000000000_a1b2.jpg".to_string(),
            device_id: "device-1".to_string(),
        }
    }

    #[test]
    fn cutting_job_uses_wire_field_names() {
        let json = serde_json::to_value(sample_job()).unwrap();
        assert!(json.get("fishData").is_some());
        assert!(json.get("deviceId").is_some());
        assert!(json["fishData"][0].get("tagName").is_some());
        assert!(json["fishData"][0].get("boundingBox").is_some());
        // no snake_case leakage
        assert!(json.get("fish_data").is_none());
        assert!(json.get("device_id").is_none());
    }

    #[test]
    fn enrichment_job_keeps_contractual_spelling() {
        let job = EnrichmentJob {
            image_to_enrich: "post-cut/device-1/x.jpg".to_string(),
            device_id: "device-1".to_string(),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("imageToEnriche").is_some());
    }

    #[test]
    fn payload_envelope_is_base64_of_json() {
        let encoded = encode_payload(&sample_job()).unwrap();
        // envelope must not be raw JSON
        assert!(!encoded.starts_with('{'));
        let decoded: CuttingJob = decode_payload(&encoded).unwrap();
        assert_eq!(decoded, sample_job());
    }

    #[test]
    fn non_base64_payload_is_a_parse_error() {
        let result: Result<CuttingJob> = decode_payload("!!! not base64 !!!");
        assert!(matches!(result, Err(Error::Parse { .. })));
        assert!(result.unwrap_err().is_terminal());
    }

    #[test]
    fn base64_of_non_json_is_a_parse_error() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("not json");
        let result: Result<EnrichmentJob> = decode_payload(&encoded);
        assert!(matches!(result, Err(Error::Parse { .. })));
    }
}
