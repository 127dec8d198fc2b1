//! OpenAI-compatible chat completions adapter.
//!
//! Serves every provider speaking the `/chat/completions` protocol. Each
//! provider gets its own instance with its own base URL and key; only
//! image-capable providers attach images as content parts.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Error, LlmError};
use crate::llm::Provider;
use crate::llm::adapter::{ModelAdapter, describe_images};

/// Request to the chat completions API.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: Content,
}

/// Content is a plain string or a list of parts.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Build the request body for one prompt.
pub fn build_request(
    model: &str,
    prompt: &str,
    images: &[String],
    supports_images: bool,
) -> ChatCompletionRequest {
    let content = if images.is_empty() {
        Content::Text(prompt.to_string())
    } else if supports_images {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text {
            text: prompt.to_string(),
        });
        parts.extend(images.iter().map(|url| ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.clone() },
        }));
        Content::Parts(parts)
    } else {
        Content::Text(describe_images(prompt, images))
    };

    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![Message {
            role: "user",
            content,
        }],
    }
}

/// Adapter for an OpenAI-compatible endpoint.
pub struct OpenAiCompatAdapter {
    provider: Provider,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    supports_images: bool,
}

impl OpenAiCompatAdapter {
    pub fn new(
        provider: Provider,
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        supports_images: bool,
    ) -> Self {
        Self {
            provider,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            supports_images,
        }
    }

    fn request_failed(&self, reason: String) -> LlmError {
        LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl ModelAdapter for OpenAiCompatAdapter {
    fn supports_images(&self) -> bool {
        self.supports_images
    }

    async fn send(&self, model: &str, prompt: &str, images: &[String]) -> Result<String, Error> {
        let Some(ref api_key) = self.api_key else {
            return Err(ConfigError::MissingProviderClient {
                provider: self.provider.to_string(),
            }
            .into());
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
                .map_err(|e| self.request_failed(format!("invalid API key header: {e}")))?,
        );

        let body = build_request(model, prompt, images, self.supports_images);
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            provider = %self.provider,
            model = model,
            images = images.len(),
            "Sending chat completion"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.request_failed(format!("HTTP {status}: {text}")).into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.request_failed(e.to_string()))?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&text).map_err(LlmError::Json)?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                LlmError::InvalidResponse {
                    provider: self.provider.to_string(),
                    reason: "missing or empty choices[0].message.content".to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_request_uses_plain_content() {
        let req = build_request("gpt-4o", "plan my trip", &[], true);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "plan my trip");
    }

    #[test]
    fn images_attached_as_parts_when_supported() {
        let images = vec!["https://x/a.png".to_string(), "data:image/png;base64,AA".to_string()];
        let req = build_request("gpt-4o", "look", &images, true);
        let json = serde_json::to_value(&req).unwrap();
        let parts = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "look");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://x/a.png");
        assert_eq!(parts[2]["image_url"]["url"], "data:image/png;base64,AA");
    }

    #[test]
    fn images_described_when_unsupported() {
        let images = vec!["https://x/a.png".to_string()];
        let req = build_request("deepseek-chat", "look", &images, false);
        let json = serde_json::to_value(&req).unwrap();
        let content = json["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with("look"));
        assert!(content.contains("1 image was provided"));
    }

    #[tokio::test]
    async fn missing_key_is_config_error() {
        let adapter = OpenAiCompatAdapter::new(
            Provider::DeepSeek,
            reqwest::Client::new(),
            "http://127.0.0.1:9/v1/",
            None,
            false,
        );
        let err = adapter.send("deepseek-chat", "hi", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingProviderClient { ref provider }) if provider == "deepseek"
        ));
    }
}
