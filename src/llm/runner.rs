//! Model runner. Resolves a model, dispatches to its adapter, and falls
//! back to the default model at most once.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Error};
use crate::llm::adapter::AdapterTable;
use crate::llm::models::{ModelOption, ModelRegistry};

/// Text produced by a model, tagged with the id of the model that answered.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResult {
    pub content: String,
    pub model_id: String,
}

/// Dispatches prompts to providers with a single-hop fallback.
#[derive(Debug, Clone)]
pub struct ModelRunner {
    registry: Arc<ModelRegistry>,
    adapters: AdapterTable,
}

impl ModelRunner {
    pub fn new(registry: Arc<ModelRegistry>, adapters: AdapterTable) -> Self {
        Self { registry, adapters }
    }

    /// Run a prompt with fallback enabled.
    pub async fn run(
        &self,
        prompt: &str,
        requested_model: Option<&str>,
        images: &[String],
    ) -> Result<ModelResult, Error> {
        self.run_model(prompt, requested_model, true, images).await
    }

    /// Run a prompt against the resolved model.
    ///
    /// When the call fails with a transient provider error, `allow_fallback` is
    /// set and the resolved model is not the default, the default model gets
    /// exactly one attempt. Configuration errors surface immediately. At most
    /// two upstream calls are made.
    pub async fn run_model(
        &self,
        prompt: &str,
        requested_model: Option<&str>,
        allow_fallback: bool,
        images: &[String],
    ) -> Result<ModelResult, Error> {
        let primary = self.registry.resolve(requested_model);
        let default = self.registry.default_model();
        let fallback = (allow_fallback && primary.id != default.id).then_some(default);

        let mut attempts = [Some(primary), fallback].into_iter().flatten().peekable();
        while let Some(model) = attempts.next() {
            match self.dispatch(model, prompt, images).await {
                Ok(content) => {
                    info!(
                        model = %model.id,
                        requested = requested_model.unwrap_or("default"),
                        "Model call succeeded"
                    );
                    return Ok(ModelResult {
                        content,
                        model_id: model.id.clone(),
                    });
                }
                Err(e) => {
                    let Some(next) = attempts.peek().filter(|_| e.is_transient()) else {
                        return Err(e);
                    };
                    warn!(
                        model = %model.id,
                        fallback = %next.id,
                        error = %e,
                        "Model call failed, falling back to default model"
                    );
                }
            }
        }

        Err(ConfigError::EmptyRegistry.into())
    }

    async fn dispatch(
        &self,
        model: &ModelOption,
        prompt: &str,
        images: &[String],
    ) -> Result<String, Error> {
        let adapter = self.adapters.get(model.provider)?;
        debug!(
            model = %model.id,
            provider = %model.provider,
            upstream = %model.model,
            "Dispatching prompt"
        );
        adapter.send(&model.model, prompt, images).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::Provider;
    use crate::llm::adapter::ModelAdapter;
    use crate::llm::models::builtin_models;

    /// Adapter scripted per upstream model name; records every call.
    #[derive(Default)]
    struct ScriptedAdapter {
        replies: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn replying(pairs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                replies: pairs
                    .iter()
                    .map(|(m, r)| (m.to_string(), r.to_string()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelAdapter for ScriptedAdapter {
        fn supports_images(&self) -> bool {
            true
        }

        async fn send(&self, model: &str, _prompt: &str, _images: &[String]) -> Result<String, Error> {
            self.calls.lock().unwrap().push(model.to_string());
            self.replies.get(model).cloned().ok_or_else(|| {
                LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: format!("HTTP 503 for {model}"),
                }
                .into()
            })
        }
    }

    fn runner_with(adapter: Arc<ScriptedAdapter>) -> ModelRunner {
        let registry = Arc::new(ModelRegistry::new(builtin_models()).unwrap());
        let table = AdapterTable::new()
            .with(Provider::OpenAi, adapter.clone())
            .with(Provider::DeepSeek, adapter.clone())
            .with(Provider::Anthropic, adapter);
        ModelRunner::new(registry, table)
    }

    #[tokio::test]
    async fn requested_model_answers_directly() {
        let adapter = ScriptedAdapter::replying(&[("deepseek-chat", "ok")]);
        let runner = runner_with(adapter.clone());

        let result = runner.run("p", Some("deepseek-chat"), &[]).await.unwrap();
        assert_eq!(result.content, "ok");
        assert_eq!(result.model_id, "deepseek-chat");
        assert_eq!(adapter.calls(), vec!["deepseek-chat"]);
    }

    #[tokio::test]
    async fn failure_falls_back_to_default_once() {
        let adapter = ScriptedAdapter::replying(&[("gpt-4o-mini", "from default")]);
        let runner = runner_with(adapter.clone());

        let result = runner.run("p", Some("claude-sonnet"), &[]).await.unwrap();
        assert_eq!(result.content, "from default");
        assert_eq!(result.model_id, "gpt-4o-mini");
        assert_eq!(adapter.calls(), vec!["claude-3-5-sonnet-latest", "gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn no_third_call_when_default_also_fails() {
        let adapter = ScriptedAdapter::replying(&[]);
        let runner = runner_with(adapter.clone());

        let err = runner.run("p", Some("claude-sonnet"), &[]).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(adapter.calls().len(), 2);
    }

    #[tokio::test]
    async fn default_model_failure_is_not_retried() {
        let adapter = ScriptedAdapter::replying(&[]);
        let runner = runner_with(adapter.clone());

        assert!(runner.run("p", None, &[]).await.is_err());
        assert_eq!(adapter.calls(), vec!["gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn fallback_disabled_makes_single_call() {
        let adapter = ScriptedAdapter::replying(&[("gpt-4o-mini", "unused")]);
        let runner = runner_with(adapter.clone());

        assert!(
            runner
                .run_model("p", Some("gpt-4o"), false, &[])
                .await
                .is_err()
        );
        assert_eq!(adapter.calls(), vec!["gpt-4o"]);
    }

    #[tokio::test]
    async fn missing_adapter_fails_without_fallback() {
        let adapter = ScriptedAdapter::replying(&[("gpt-4o-mini", "unused")]);
        let registry = Arc::new(ModelRegistry::new(builtin_models()).unwrap());
        let runner = ModelRunner::new(
            registry,
            AdapterTable::new().with(Provider::OpenAi, adapter.clone()),
        );

        let err = runner.run("p", Some("claude-sonnet"), &[]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingProviderClient { .. })
        ));
        assert!(!err.is_transient());
        assert!(adapter.calls().is_empty());
    }

    /// Adapter that has no API key configured.
    struct KeylessAdapter;

    #[async_trait]
    impl ModelAdapter for KeylessAdapter {
        fn supports_images(&self) -> bool {
            false
        }

        async fn send(&self, _model: &str, _prompt: &str, _images: &[String]) -> Result<String, Error> {
            Err(ConfigError::MissingProviderClient {
                provider: "anthropic".into(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn keyless_provider_is_a_job_failure_not_a_fallback() {
        let adapter = ScriptedAdapter::replying(&[("gpt-4o-mini", "unused")]);
        let registry = Arc::new(ModelRegistry::new(builtin_models()).unwrap());
        let runner = ModelRunner::new(
            registry,
            AdapterTable::new()
                .with(Provider::OpenAi, adapter.clone())
                .with(Provider::Anthropic, Arc::new(KeylessAdapter)),
        );

        let err = runner.run("p", Some("claude-sonnet"), &[]).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_requested_id_uses_default_without_fallback_hop() {
        let adapter = ScriptedAdapter::replying(&[]);
        let runner = runner_with(adapter.clone());

        assert!(runner.run("p", Some("no-such-model"), &[]).await.is_err());
        assert_eq!(adapter.calls(), vec!["gpt-4o-mini"]);
    }
}
