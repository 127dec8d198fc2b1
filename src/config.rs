//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Connection settings for one upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// API key; `None` means no client is provisioned for this provider.
    pub api_key: Option<SecretString>,
    /// Base URL of the provider API, without a trailing slash.
    pub base_url: String,
}

impl ProviderSettings {
    fn from_env(key_var: &str, url_var: &str, default_url: &str) -> Self {
        let api_key = std::env::var(key_var)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(SecretString::from);
        let base_url = std::env::var(url_var)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_url.to_string());

        Self {
            api_key,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }
}

/// Settings for the Anthropic messages endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicSettings {
    pub provider: ProviderSettings,
    /// Value of the `anthropic-version` header.
    pub version: String,
    /// `max_tokens` cap sent with every request.
    pub max_tokens: u32,
}

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Max in-flight decomposition jobs.
    pub decompose_concurrency: usize,
    /// Max in-flight investigation jobs.
    pub investigate_concurrency: usize,
    /// Buffered messages per named queue.
    pub queue_capacity: usize,
    /// Per-request timeout for upstream HTTP calls.
    pub http_timeout: Duration,
    /// Inline model list (JSON array).
    pub models_json: Option<String>,
    /// Path to a model list file (JSON array).
    pub models_file: Option<PathBuf>,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub openai: ProviderSettings,
    pub deepseek: ProviderSettings,
    pub anthropic: AnthropicSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/questline.db"),
            decompose_concurrency: 2,
            investigate_concurrency: 4,
            queue_capacity: 256,
            http_timeout: Duration::from_secs(120),
            models_json: None,
            models_file: None,
            log_dir: None,
            openai: ProviderSettings {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
            },
            deepseek: ProviderSettings {
                api_key: None,
                base_url: "https://api.deepseek.com/v1".to_string(),
            },
            anthropic: AnthropicSettings {
                provider: ProviderSettings {
                    api_key: None,
                    base_url: "https://api.anthropic.com".to_string(),
                },
                version: "2023-06-01".to_string(),
                max_tokens: 4096,
            },
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db_path = std::env::var("QUESTLINE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let decompose_concurrency: usize = env_parse("QUESTLINE_DECOMPOSE_CONCURRENCY")
            .unwrap_or(defaults.decompose_concurrency)
            .max(1);

        let investigate_concurrency: usize = env_parse("QUESTLINE_INVESTIGATE_CONCURRENCY")
            .unwrap_or(defaults.investigate_concurrency)
            .max(1);

        let queue_capacity: usize = env_parse("QUESTLINE_QUEUE_CAPACITY")
            .unwrap_or(defaults.queue_capacity)
            .max(1);

        let http_timeout = env_parse::<u64>("QUESTLINE_HTTP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let models_json = std::env::var("QUESTLINE_MODELS")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let models_file = std::env::var("QUESTLINE_MODELS_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let log_dir = std::env::var("QUESTLINE_LOG_DIR").ok().map(PathBuf::from);

        let anthropic = AnthropicSettings {
            provider: ProviderSettings::from_env(
                "ANTHROPIC_API_KEY",
                "ANTHROPIC_BASE_URL",
                &defaults.anthropic.provider.base_url,
            ),
            version: std::env::var("ANTHROPIC_VERSION").unwrap_or(defaults.anthropic.version),
            max_tokens: env_parse("ANTHROPIC_MAX_TOKENS").unwrap_or(defaults.anthropic.max_tokens),
        };

        Self {
            db_path,
            decompose_concurrency,
            investigate_concurrency,
            queue_capacity,
            http_timeout,
            models_json,
            models_file,
            log_dir,
            openai: ProviderSettings::from_env(
                "OPENAI_API_KEY",
                "OPENAI_BASE_URL",
                &defaults.openai.base_url,
            ),
            deepseek: ProviderSettings::from_env(
                "DEEPSEEK_API_KEY",
                "DEEPSEEK_BASE_URL",
                &defaults.deepseek.base_url,
            ),
            anthropic,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
