//! LLM integration.
//!
//! Supports:
//! - **OpenAI**: chat completions, images attached as content parts
//! - **DeepSeek**: same wire protocol as OpenAI, images described in text
//! - **Anthropic**: messages API, images described in text
//!
//! Adapters are built once at startup by [`build_adapters`] and injected
//! into the [`ModelRunner`], which owns resolution and fallback.

pub mod adapter;
pub mod anthropic;
pub mod models;
pub mod openai;
pub mod runner;

pub use adapter::{AdapterTable, ModelAdapter};
pub use anthropic::AnthropicAdapter;
pub use models::{ModelOption, ModelRegistry, ModelSource};
pub use openai::OpenAiCompatAdapter;
pub use runner::{ModelResult, ModelRunner};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppConfig;
use crate::error::{ConfigError, LlmError};

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    DeepSeek,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::InvalidValue {
                key: "provider".to_string(),
                message: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// Build one adapter per provider from configuration.
///
/// Providers without an API key still get an adapter; it fails every call
/// with `MissingProviderClient`, which fails the job without a fallback hop.
pub fn build_adapters(config: &AppConfig) -> Result<AdapterTable, LlmError> {
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: "http".to_string(),
            reason: format!("Failed to build HTTP client: {e}"),
        })?;

    let openai = OpenAiCompatAdapter::new(
        Provider::OpenAi,
        client.clone(),
        &config.openai.base_url,
        config.openai.api_key.clone(),
        true,
    );
    let deepseek = OpenAiCompatAdapter::new(
        Provider::DeepSeek,
        client.clone(),
        &config.deepseek.base_url,
        config.deepseek.api_key.clone(),
        false,
    );
    let anthropic = AnthropicAdapter::new(
        client,
        &config.anthropic.provider.base_url,
        config.anthropic.provider.api_key.clone(),
        &config.anthropic.version,
        config.anthropic.max_tokens,
    );

    for (provider, configured) in [
        (Provider::OpenAi, config.openai.api_key.is_some()),
        (Provider::DeepSeek, config.deepseek.api_key.is_some()),
        (Provider::Anthropic, config.anthropic.provider.api_key.is_some()),
    ] {
        info!(provider = %provider, configured, "Provider adapter ready");
    }

    Ok(AdapterTable::new()
        .with(Provider::OpenAi, Arc::new(openai))
        .with(Provider::DeepSeek, Arc::new(deepseek))
        .with(Provider::Anthropic, Arc::new(anthropic)))
}
