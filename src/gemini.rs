use crate::config::GeminiConfig;
use crate::quota::{CallError, QuotaTracker};
use anyhow::anyhow;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reply from a generative call
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    pub tokens_used: Option<u32>,
}

/// Seam for the generative backend so chat and processing can be
/// exercised without network access
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Text-only generation with the chat model
    async fn generate(&self, prompt: &str) -> Result<ModelReply, CallError>;

    /// Generation over a prompt plus one JPEG frame with the vision model
    async fn describe_image(&self, prompt: &str, jpeg: &[u8]) -> Result<ModelReply, CallError>;

    /// Embedding vector for a text span
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError>;

    async fn is_available(&self) -> bool;
}

/// Gemini REST client. Reports actual token usage back into the quota
/// tracker and surfaces provider limit responses as their own error.
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
    tracker: Arc<QuotaTracker>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
    #[serde(
        rename = "inlineData",
        skip_serializing_if = "Option::is_none",
        default
    )]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn jpeg(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "image/jpeg".to_string(),
                data: STANDARD.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig, tracker: Arc<QuotaTracker>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            client,
            tracker,
        })
    }

    fn require_key(&self) -> Result<&str, CallError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| CallError::Other(anyhow!("Gemini API key not configured")))
    }

    async fn post_generate(&self, model: &str, request: &GenerateRequest) -> Result<ModelReply, CallError> {
        let api_key = self.require_key()?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, model, api_key
        );

        debug!("🌐 Calling Gemini model '{}'", model);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::QuotaExhausted);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::Other(anyhow!(
                "Gemini API error {}: {}",
                status,
                text
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(anyhow::Error::from)?;

        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .and_then(|p| p.text.clone())
            .ok_or_else(|| CallError::Other(anyhow!("Empty response from Gemini")))?;

        let tokens_used = parsed.usage_metadata.map(|u| u.total_token_count);
        if let Some(tokens) = tokens_used {
            self.tracker.record_tokens(tokens as u64).await;
        }

        Ok(ModelReply { text, tokens_used })
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<ModelReply, CallError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part::text(prompt)],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
            },
        };

        self.post_generate(&self.config.chat_model, &request).await
    }

    async fn describe_image(&self, prompt: &str, jpeg: &[u8]) -> Result<ModelReply, CallError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part::text(prompt), Part::jpeg(jpeg)],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
            },
        };

        self.post_generate(&self.config.vision_model, &request).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError> {
        let api_key = self.require_key()?;
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.config.base_url, self.config.embedding_model, api_key
        );

        let request = EmbedRequest {
            model: format!("models/{}", self.config.embedding_model),
            content: Content {
                parts: vec![Part::text(text)],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::QuotaExhausted);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::Other(anyhow!(
                "Gemini embedding error {}: {}",
                status,
                text
            )));
        }

        let parsed: EmbedResponse = response.json().await.map_err(anyhow::Error::from)?;
        Ok(parsed.embedding.values)
    }

    async fn is_available(&self) -> bool {
        let api_key = match &self.config.api_key {
            Some(key) => key,
            None => return false,
        };

        let url = format!("{}/models?key={}", self.config.base_url, api_key);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
