//! Model invocation seam
//!
//! The replay engine never talks to a provider directly. It hands a transcript
//! and a [`ModelConfig`] to a [`ModelInvoker`], which is implemented by the
//! embedding application (HTTP client, provider SDK, test double).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod stub;

pub use stub::{RecordedCall, ScriptedInvoker, ScriptedOutcome, StubModelInvoker};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Model configuration used for a (re-)execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name (e.g. "openai", "anthropic")
    pub provider: String,

    /// Model name
    pub model: String,

    /// Temperature for generation (0.0-2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System prompt prepended to the replayed transcript
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Output of a single model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Generated content
    pub content: String,

    /// Token usage reported by the provider
    pub usage: TokenUsage,

    /// Cost in USD if the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Trait for the model-invocation layer.
///
/// Implementations perform exactly one provider call per `invoke`. Failures
/// should map to [`RewindError::Provider`](crate::error::RewindError::Provider)
/// or [`RewindError::RateLimit`](crate::error::RewindError::RateLimit). Retrying
/// is left to callers so billed calls are never silently duplicated.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Issue one model call with the given transcript as context
    async fn invoke(&self, transcript: &[Message], config: &ModelConfig) -> Result<Invocation>;
}
