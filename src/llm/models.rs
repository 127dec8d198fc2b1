//! Model registry: the list of selectable models and id resolution.
//!
//! The list comes from an inline JSON value, a JSON file, or the built-in
//! defaults, in that order. Whatever the source, the registry that comes out
//! is non-empty and has exactly one enabled default model.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::llm::Provider;

/// A selectable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOption {
    /// Stable id used by jobs and persisted records.
    pub id: String,
    /// Display label.
    pub label: String,
    pub provider: Provider,
    /// Concrete upstream model identifier.
    pub model: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub enabled: bool,
    pub default: bool,
}

/// A model record as it appears in configuration, before sanitizing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawModelOption {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub default: Option<bool>,
}

/// Where to look for the model list.
#[derive(Debug, Clone, Default)]
pub struct ModelSource {
    /// Inline JSON array (e.g. from an environment variable).
    pub inline: Option<String>,
    /// Path to a file holding a JSON array.
    pub file: Option<PathBuf>,
}

/// Built-in model list used when configuration yields nothing usable.
pub fn builtin_models() -> Vec<ModelOption> {
    vec![
        ModelOption {
            id: "gpt-4o-mini".to_string(),
            label: "GPT-4o mini".to_string(),
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            tags: vec!["fast".to_string(), "vision".to_string()],
            enabled: true,
            default: true,
        },
        ModelOption {
            id: "gpt-4o".to_string(),
            label: "GPT-4o".to_string(),
            provider: Provider::OpenAi,
            model: "gpt-4o".to_string(),
            tags: vec!["vision".to_string()],
            enabled: true,
            default: false,
        },
        ModelOption {
            id: "deepseek-chat".to_string(),
            label: "DeepSeek Chat".to_string(),
            provider: Provider::DeepSeek,
            model: "deepseek-chat".to_string(),
            tags: vec!["cheap".to_string()],
            enabled: true,
            default: false,
        },
        ModelOption {
            id: "claude-sonnet".to_string(),
            label: "Claude Sonnet".to_string(),
            provider: Provider::Anthropic,
            model: "claude-3-5-sonnet-latest".to_string(),
            tags: vec!["reasoning".to_string()],
            enabled: true,
            default: false,
        },
    ]
}

/// Load the model list from the first source that yields usable records.
///
/// Never returns an empty list.
pub fn load_models(source: &ModelSource) -> Vec<ModelOption> {
    if let Some(ref inline) = source.inline {
        match parse_model_list(inline) {
            Ok(raw) => {
                debug!(count = raw.len(), "Loaded model list from inline configuration");
                return sanitize_models(raw);
            }
            Err(e) => warn!(error = %e, "Ignoring malformed inline model list"),
        }
    }

    if let Some(ref path) = source.file {
        match std::fs::read_to_string(path) {
            Ok(text) => match parse_model_list(&text) {
                Ok(raw) => {
                    debug!(path = %path.display(), count = raw.len(), "Loaded model list from file");
                    return sanitize_models(raw);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring malformed model list file")
                }
            },
            Err(e) => warn!(path = %path.display(), error = %e, "Could not read model list file"),
        }
    }

    info!("Using built-in model list");
    builtin_models()
}

fn parse_model_list(text: &str) -> Result<Vec<RawModelOption>, ConfigError> {
    serde_json::from_str(text).map_err(|e| ConfigError::ParseError(format!("model list: {e}")))
}

/// Sanitize raw records into a usable list.
///
/// Drops records with a blank id, blank model or unknown provider, keeps the
/// first record for each id, and guarantees exactly one enabled default.
/// Falls back to the built-ins when nothing enabled survives.
pub fn sanitize_models(raw: Vec<RawModelOption>) -> Vec<ModelOption> {
    let mut seen = HashSet::new();
    let mut models = Vec::with_capacity(raw.len());

    for record in raw {
        let id = trimmed(record.id);
        let model = trimmed(record.model);
        let (Some(id), Some(model)) = (id, model) else {
            debug!("Dropping model record without id or model");
            continue;
        };

        let Some(provider) = record
            .provider
            .as_deref()
            .and_then(|p| p.trim().parse::<Provider>().ok())
        else {
            warn!(id = %id, provider = ?record.provider, "Dropping model record with unknown provider");
            continue;
        };

        if !seen.insert(id.clone()) {
            debug!(id = %id, "Dropping duplicate model record");
            continue;
        }

        let tags = record
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        models.push(ModelOption {
            label: trimmed(record.label).unwrap_or_else(|| id.clone()),
            id,
            provider,
            model,
            tags,
            enabled: record.enabled.unwrap_or(true),
            default: record.default.unwrap_or(false),
        });
    }

    if !enforce_single_default(&mut models) {
        warn!("No enabled models configured, falling back to built-in list");
        return builtin_models();
    }

    models
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Make exactly one enabled model the default. Returns false when no model is enabled.
fn enforce_single_default(models: &mut [ModelOption]) -> bool {
    let Some(first_enabled) = models.iter().position(|m| m.enabled) else {
        return false;
    };
    let chosen = models
        .iter()
        .position(|m| m.enabled && m.default)
        .unwrap_or(first_enabled);

    for (i, model) in models.iter_mut().enumerate() {
        model.default = i == chosen;
    }
    true
}

/// Read-only registry of models, shared across jobs.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelOption>,
    default_index: usize,
}

impl ModelRegistry {
    /// Build a registry from a model list.
    ///
    /// Fails with `EmptyRegistry` when the list has no enabled model.
    pub fn new(mut models: Vec<ModelOption>) -> Result<Self, ConfigError> {
        if !enforce_single_default(&mut models) {
            return Err(ConfigError::EmptyRegistry);
        }
        let default_index = models
            .iter()
            .position(|m| m.default)
            .ok_or(ConfigError::EmptyRegistry)?;

        Ok(Self {
            models,
            default_index,
        })
    }

    /// Load from the given source; always succeeds thanks to the built-in fallback.
    pub fn load(source: &ModelSource) -> Result<Self, ConfigError> {
        Self::new(load_models(source))
    }

    /// The designated default model.
    pub fn default_model(&self) -> &ModelOption {
        &self.models[self.default_index]
    }

    /// Look up an enabled model by id.
    pub fn get(&self, id: &str) -> Option<&ModelOption> {
        self.models.iter().find(|m| m.enabled && m.id == id)
    }

    /// Resolve a requested id, defaulting when absent or unknown.
    pub fn resolve(&self, requested: Option<&str>) -> &ModelOption {
        match requested.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.get(id).unwrap_or_else(|| {
                debug!(requested = id, "Unknown model requested, using default");
                self.default_model()
            }),
            None => self.default_model(),
        }
    }

    /// Enabled models in configuration order.
    pub fn enabled(&self) -> impl Iterator<Item = &ModelOption> {
        self.models.iter().filter(|m| m.enabled)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
