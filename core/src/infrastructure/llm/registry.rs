// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Model-name → provider resolution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::domain::config::LlmConfig;
use crate::domain::llm::LLMProvider;
use crate::infrastructure::llm::openai::OpenAiCompatAdapter;

/// Registry of configured LLM backends, keyed by model name. An agent
/// referencing a model that does not resolve is a construction failure.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(configs: &[LlmConfig]) -> Self {
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        for config in configs {
            info!(model = %config.model, base_url = %config.base_url, "registering LLM backend");
            providers.insert(
                config.model.clone(),
                Arc::new(OpenAiCompatAdapter::new(
                    config.base_url.clone(),
                    config.api_key.clone(),
                    config.model.clone(),
                )),
            );
        }
        Self { providers }
    }

    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registers a provider under a model name; used by tests to inject
    /// mock backends.
    pub fn insert(&mut self, model: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.providers.insert(model.into(), provider);
    }

    pub fn resolve(&self, model: &str) -> anyhow::Result<Arc<dyn LLMProvider>> {
        self.providers
            .get(model)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("LLM model '{}' is not configured", model))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::llm::mock::MockProvider;

    #[test]
    fn resolves_registered_models_only() {
        let mut registry = ProviderRegistry::empty();
        registry.insert("mock-1", Arc::new(MockProvider::new()));

        assert!(registry.resolve("mock-1").is_ok());
        assert!(registry.resolve("missing").is_err());
    }

    #[test]
    fn builds_from_config() {
        let registry = ProviderRegistry::from_config(&[LlmConfig {
            model: "qwen-max".to_string(),
            base_url: "https://example.invalid/v1".to_string(),
            api_key: "k".to_string(),
        }]);
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("qwen-max").is_ok());
    }
}
