//! Provider adapter trait and the provider-keyed adapter table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ConfigError, Error};
use crate::llm::Provider;

/// One upstream wire protocol: text (plus optional images) in, text out.
///
/// Each `send` performs exactly one upstream call.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Whether images are attached to the request rather than described in text.
    fn supports_images(&self) -> bool;

    /// Send a single user prompt to `model` and return the raw text reply.
    async fn send(&self, model: &str, prompt: &str, images: &[String]) -> Result<String, Error>;
}

/// Lookup table from provider to the adapter serving it.
#[derive(Clone, Default)]
pub struct AdapterTable {
    adapters: HashMap<Provider, Arc<dyn ModelAdapter>>,
}

impl AdapterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for a provider.
    pub fn insert(&mut self, provider: Provider, adapter: Arc<dyn ModelAdapter>) {
        self.adapters.insert(provider, adapter);
    }

    pub fn with(mut self, provider: Provider, adapter: Arc<dyn ModelAdapter>) -> Self {
        self.insert(provider, adapter);
        self
    }

    /// Adapter for `provider`, or `MissingProviderClient`.
    pub fn get(&self, provider: Provider) -> Result<&Arc<dyn ModelAdapter>, ConfigError> {
        self.adapters
            .get(&provider)
            .ok_or_else(|| ConfigError::MissingProviderClient {
                provider: provider.to_string(),
            })
    }
}

impl std::fmt::Debug for AdapterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.adapters.keys().map(|p| p.as_str()).collect();
        providers.sort_unstable();
        f.debug_struct("AdapterTable")
            .field("providers", &providers)
            .finish()
    }
}

/// Text note used by adapters that cannot attach images.
pub(crate) fn describe_images(prompt: &str, images: &[String]) -> String {
    match images.len() {
        0 => prompt.to_string(),
        1 => format!("{prompt}\n\n(1 image was provided but cannot be attached for this model.)"),
        n => format!("{prompt}\n\n({n} images were provided but cannot be attached for this model.)"),
    }
}
