// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Domain seam for LLM backends.
//!
//! Every call through this trait is a fallible remote call; the runtime
//! treats the backend as an external collaborator and never holds a lock
//! across a generation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Chat backend behind each agent.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion for a single user turn.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError>;

    /// Check the backend is reachable.
    async fn health_check(&self) -> Result<(), LLMError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(4096),
            temperature: Some(0.7),
            stop_sequences: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
    /// Provider name, e.g. "openai-compatible".
    pub provider: String,
    pub model: String,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural completion.
    Stop,
    /// Hit the max_tokens limit.
    Length,
    /// Blocked by a content filter.
    ContentFilter,
}

#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("generation timed out after {0}s")]
    Timeout(u64),
}
