// src/vision_client.rs
//
// Fallback classifier backed by a hosted vision-language model.
//
// The current frame is sent as a base64 JPEG data URI together with the
// list of valid labels; the model is told to answer with exactly one
// label or NONE. Interpreting that answer is left to
// recognition::escalation::reconcile_label.

use crate::types::EscalationConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a pose classifier. Respond with exactly one label from the list. If none match, reply with NONE.";

/// Quality used when encoding raw frames for upload
const JPEG_QUALITY: u8 = 80;

/// External classifier consulted on near-miss frames.
#[async_trait]
pub trait FallbackClassifier: Send + Sync {
    /// Free-text answer for `image` given the candidate `labels`.
    async fn classify(&self, image: &FrameImage, labels: &[String]) -> Result<String>;
}

// ============================================================================
// FRAME IMAGE
// ============================================================================

/// Frame handed to the fallback classifier.
#[derive(Debug, Clone)]
pub enum FrameImage {
    /// Already JPEG-encoded bytes
    Jpeg(Vec<u8>),
    /// Packed RGB8, row-major
    Rgb {
        data: Vec<u8>,
        width: usize,
        height: usize,
    },
}

impl FrameImage {
    pub fn to_jpeg(&self) -> Option<Vec<u8>> {
        match self {
            FrameImage::Jpeg(bytes) => Some(bytes.clone()),
            FrameImage::Rgb {
                data,
                width,
                height,
            } => encode_rgb_to_jpeg(data, *width, *height),
        }
    }

    pub fn to_data_uri(&self) -> Option<String> {
        let jpeg = self.to_jpeg()?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(jpeg);
        Some(format!("data:image/jpeg;base64,{}", b64))
    }
}

/// Encode raw RGB bytes into a JPEG. Returns None on failure.
pub fn encode_rgb_to_jpeg(rgb_data: &[u8], width: usize, height: usize) -> Option<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    let img: RgbImage = ImageBuffer::from_raw(width as u32, height as u32, rgb_data.to_vec())?;

    let mut buf = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    img.write_with_encoder(encoder).ok()?;

    Some(buf.into_inner())
}

// ============================================================================
// REQUEST / RESPONSE TYPES (chat-completions wire format)
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct VisionModelClient {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl VisionModelClient {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Client for the configured endpoint, or `None` when escalation is
    /// disabled or no API key is available.
    pub fn from_config(config: &EscalationConfig, api_key: Option<String>) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(api_key) = api_key else {
            warn!(
                "Vision fallback enabled but {} not set; escalation will be skipped",
                config.api_key_env
            );
            return Ok(None);
        };
        let client = Self::new(&config.endpoint, &config.model, &api_key, config.timeout_secs)?;
        info!("✓ Vision fallback ready ({} @ {})", config.model, config.endpoint);
        Ok(Some(client))
    }

    pub fn build_request(&self, data_uri: String, labels: &[String]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: format!(
                                "Valid labels: {}. Return exactly one of these labels. If none match, reply with NONE.",
                                labels.join(", ")
                            ),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_uri },
                        },
                    ]),
                },
            ],
        }
    }
}

#[async_trait]
impl FallbackClassifier for VisionModelClient {
    async fn classify(&self, image: &FrameImage, labels: &[String]) -> Result<String> {
        let data_uri = image
            .to_data_uri()
            .context("Failed to encode frame as JPEG")?;
        let request = self.build_request(data_uri, labels);

        debug!("Sending frame to {} with {} labels", self.endpoint, labels.len());

        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Vision model request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Vision model returned HTTP {}: {}", status, body);
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse vision model response")?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
