//! AI completion provider abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Request submitted to the AI provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The prompt text
    pub prompt: String,
    /// Persona/system context accompanying the prompt
    pub system: Option<String>,
    /// Free-form request metadata (workflow id, step index, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A completed AI response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub content: String,
    /// Model that produced the completion
    pub model: String,
    /// Token usage for the call
    #[serde(default)]
    pub usage: TokenUsage,
}

impl Completion {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Provider call timed out")]
    Timeout,

    #[error("Provider rejected the request: rate limited")]
    RateLimited,

    #[error("Provider error: {0}")]
    Provider(String),
}

/// External AI completion provider.
///
/// The engine never talks to a provider directly; every call goes through
/// the request throttler.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("Draft the brief")
            .with_system("You are a product manager")
            .with_metadata("step", "0");

        assert_eq!(request.prompt, "Draft the brief");
        assert_eq!(request.system.as_deref(), Some("You are a product manager"));
        assert_eq!(request.metadata.get("step"), Some(&"0".to_string()));
    }

    #[test]
    fn test_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 80,
        };
        assert_eq!(usage.total(), 200);
    }
}
