//! Chat-completions language model client
//!
//! Talks to an Azure-hosted OpenAI deployment over the chat completions
//! API. Three uses: naming a species from a crop, extracting a full
//! species profile from a crop, and answering questions about a
//! device's sightings. The [`LanguageModel`] trait is the seam the
//! workers and the chat endpoint depend on, so tests can substitute a
//! scripted model.

use crate::models::SpeciesProfile;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use finsight_common::config::LanguageModelConfig;
use finsight_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;

const USER_AGENT: &str = "finsight/0.1.0";
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f64 = 0.7;

/// System prompt for species naming. The model must reply with a strict
/// single-key JSON object so the reply can be parsed mechanically.
const NAME_PROMPT: &str = "\
You are an expert marine biologist AI that analyzes fish images with maximum accuracy.

When provided with a fish image, identify the most likely species with the highest possible precision.

Respond ONLY with the following exact JSON format:
{\"fishName\": \"Common name of the fish\"}

Guidelines:
- Use the common name of the most prominent fish visible in the image.
- If uncertain, still provide the most likely name but ensure accuracy remains a priority.
- Base your identification on distinctive features, coloration, shape, and patterns.
- No extra text or formatting, only the JSON response exactly as shown.";

/// System prompt for full profile extraction. Field names and the
/// allowed enum values must line up with the catalog schema.
const PROFILE_PROMPT: &str = "\
You are an expert marine biologist AI that analyzes fish images with maximum accuracy.

When provided with a fish image, describe the most prominent fish as a structured profile.

Respond ONLY with a JSON object with exactly these fields:
{
  \"name\": \"Common name of the fish\",
  \"family\": \"Taxonomic family\",
  \"minSize\": 0,
  \"maxSize\": 0,
  \"waterType\": \"freshwater | saltwater | brackish\",
  \"description\": \"General description\",
  \"colorDescription\": \"Coloration and patterns\",
  \"depthRangeMin\": 0,
  \"depthRangeMax\": 0,
  \"environment\": \"Typical habitat\",
  \"region\": \"Geographic range\",
  \"conservationStatus\": \"Least Concern | Near Threatened | Vulnerable | Endangered | Critically Endangered | Extinct in the Wild | Extinct | Data Deficient\",
  \"consStatusDescription\": \"Why it holds that status\",
  \"aiAccuracy\": 0,
  \"colors\": [\"dominant colors\"],
  \"predators\": [\"known predators\"],
  \"funFacts\": [\"short interesting facts\"]
}

Sizes are in centimeters, depths in meters, aiAccuracy is your own confidence from 0 to 100.
No extra text or formatting, only the JSON object.";

const CHAT_PROMPT_HEADER: &str =
    "You are a helpful assistant with knowledge about the following fish that have been detected:";

const CHAT_PROMPT_RULES: &str = "\
Please answer questions about these specific fish detections and provide accurate information \
based on the data provided. Just return a normal string without any special formatting. \
Reply only to questions about the fish detections, not to other topics.";

/// Language model client errors
#[derive(Debug, ThisError)]
pub enum LmError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Model returned no reply")]
    EmptyReply,
}

impl From<LmError> for Error {
    fn from(err: LmError) -> Self {
        match err {
            LmError::ParseError(detail) => Error::parse("chat completion response", &detail),
            LmError::EmptyReply => Error::parse("chat completion response", "no choices in reply"),
            other => Error::upstream("language model", other.to_string()),
        }
    }
}

/// The model-facing seam for species naming, profile extraction, and
/// sighting Q&A.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Name the most prominent fish in a JPEG crop.
    async fn identify_species(&self, image_jpeg: &[u8]) -> Result<String>;

    /// Extract a full species profile from a JPEG crop.
    async fn extract_profile(&self, image_jpeg: &[u8]) -> Result<SpeciesProfile>;

    /// Answer a question against a prepared sightings context.
    async fn answer_question(&self, context: &str, question: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_image(image_jpeg: &[u8]) -> Self {
        Self {
            role: "user",
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_data_url(image_jpeg),
                },
            }]),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Chat completions API client for an Azure OpenAI deployment.
pub struct ChatCompletionsClient {
    http_client: reqwest::Client,
    endpoint: String,
    key: String,
    deployment: String,
    api_version: String,
}

impl ChatCompletionsClient {
    pub fn new(config: &LanguageModelConfig) -> std::result::Result<Self, LmError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LmError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
        })
    }

    /// Run one chat completion and return the first choice's content.
    async fn complete(&self, messages: Vec<ChatMessage>) -> std::result::Result<String, LmError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );

        let request = ChatRequest {
            messages,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        tracing::debug!(deployment = %self.deployment, "Requesting chat completion");

        let response = self
            .http_client
            .post(&url)
            .header("api-key", &self.key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LmError::ApiError(status.as_u16(), truncate(&body, 200)));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LmError::ParseError(format!("Invalid completion response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LmError::EmptyReply)
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn identify_species(&self, image_jpeg: &[u8]) -> Result<String> {
        let reply = self
            .complete(vec![
                ChatMessage::system(NAME_PROMPT),
                ChatMessage::user_image(image_jpeg),
            ])
            .await
            .map_err(Error::from)?;

        parse_name_reply(&reply)
    }

    async fn extract_profile(&self, image_jpeg: &[u8]) -> Result<SpeciesProfile> {
        let reply = self
            .complete(vec![
                ChatMessage::system(PROFILE_PROMPT),
                ChatMessage::user_image(image_jpeg),
            ])
            .await
            .map_err(Error::from)?;

        parse_profile_reply(&reply)
    }

    async fn answer_question(&self, context: &str, question: &str) -> Result<String> {
        let system = format!("{}\n\n{}\n\n{}", CHAT_PROMPT_HEADER, context, CHAT_PROMPT_RULES);
        let reply = self
            .complete(vec![
                ChatMessage::system(system),
                ChatMessage::user_text(question),
            ])
            .await
            .map_err(Error::from)?;

        Ok(reply)
    }
}

fn image_data_url(image: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", BASE64.encode(image))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

/// Strip a Markdown code fence wrapper, if present.
///
/// Models frequently wrap JSON replies in ```` ```json ```` fences even
/// when told not to.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the end of the opening line
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    match rest.strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => rest.trim(),
    }
}

#[derive(Debug, Deserialize)]
struct NameReply {
    #[serde(rename = "fishName")]
    fish_name: String,
}

/// Parse a species-name reply of the form `{"fishName": "..."}`.
pub fn parse_name_reply(raw: &str) -> Result<String> {
    let stripped = strip_code_fences(raw);
    let reply: NameReply =
        serde_json::from_str(stripped).map_err(|_| Error::parse("species name reply", raw))?;

    let name = reply.fish_name.trim().to_string();
    if name.is_empty() {
        return Err(Error::parse("species name reply", raw));
    }
    Ok(name)
}

/// Parse a species-profile reply into a [`SpeciesProfile`].
pub fn parse_profile_reply(raw: &str) -> Result<SpeciesProfile> {
    let stripped = strip_code_fences(raw);
    serde_json::from_str(stripped).map_err(|_| Error::parse("species profile reply", raw))
}
