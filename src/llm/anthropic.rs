//! Anthropic messages API adapter.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Error, LlmError};
use crate::llm::Provider;
use crate::llm::adapter::{ModelAdapter, describe_images};

/// Request to `/v1/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Build the request body for one prompt. Images are only described.
pub fn build_request(model: &str, prompt: &str, images: &[String], max_tokens: u32) -> MessagesRequest {
    MessagesRequest {
        model: model.to_string(),
        max_tokens,
        messages: vec![Message {
            role: "user",
            content: describe_images(prompt, images),
        }],
    }
}

/// Concatenate all text blocks and trim.
fn collect_text(response: MessagesResponse) -> String {
    response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Adapter for the Anthropic messages endpoint.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    version: String,
    max_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        version: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            version: version.into(),
            max_tokens,
        }
    }

    fn request_failed(reason: String) -> LlmError {
        LlmError::RequestFailed {
            provider: Provider::Anthropic.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl ModelAdapter for AnthropicAdapter {
    fn supports_images(&self) -> bool {
        false
    }

    async fn send(&self, model: &str, prompt: &str, images: &[String]) -> Result<String, Error> {
        let Some(ref api_key) = self.api_key else {
            return Err(ConfigError::MissingProviderClient {
                provider: Provider::Anthropic.to_string(),
            }
            .into());
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.expose_secret())
                .map_err(|e| Self::request_failed(format!("invalid API key header: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.version)
                .map_err(|e| Self::request_failed(format!("invalid version header: {e}")))?,
        );

        let body = build_request(model, prompt, images, self.max_tokens);
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = model, images = images.len(), "Sending Anthropic message");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::request_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::request_failed(format!("HTTP {status}: {text}")).into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| Self::request_failed(e.to_string()))?;
        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(LlmError::Json)?;

        let reply = collect_text(parsed);
        if reply.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: Provider::Anthropic.to_string(),
                reason: "no text content blocks".to_string(),
            }
            .into());
        }
        Ok(reply)
    }
}
