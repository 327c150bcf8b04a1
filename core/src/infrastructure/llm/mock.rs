// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Scriptable in-memory provider for tests and offline runs.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::llm::{
    FinishReason, GenerationOptions, GenerationResponse, LLMError, LLMProvider, TokenUsage,
};

enum Scripted {
    Text(String),
    Error(LLMError),
}

/// Returns queued canned responses in order, then falls back to a fixed
/// default. Records every prompt it receives.
pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<String>>,
    default_text: String,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            default_text: "acknowledged".to_string(),
        }
    }

    pub fn with_default_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.script.lock().push_back(Scripted::Text(text.into()));
    }

    pub fn push_error(&self, error: LLMError) {
        self.script.lock().push_back(Scripted::Error(error));
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        self.prompts.lock().push(prompt.to_string());
        let next = self.script.lock().pop_front();
        let text = match next {
            Some(Scripted::Text(text)) => text,
            Some(Scripted::Error(error)) => return Err(error),
            None => self.default_text.clone(),
        };
        Ok(GenerationResponse {
            text,
            usage: TokenUsage::default(),
            provider: "mock".to_string(),
            model: "mock".to_string(),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_back_script_then_default() {
        let mock = MockProvider::new().with_default_text("fallback");
        mock.push_text("first");
        mock.push_error(LLMError::RateLimit);

        let opts = GenerationOptions::default();
        assert_eq!(mock.generate("p1", &opts).await.unwrap().text, "first");
        assert!(matches!(
            mock.generate("p2", &opts).await,
            Err(LLMError::RateLimit)
        ));
        assert_eq!(mock.generate("p3", &opts).await.unwrap().text, "fallback");
        assert_eq!(mock.prompts(), vec!["p1", "p2", "p3"]);
    }
}
