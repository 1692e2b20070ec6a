//! Invoker stubs for offline, deterministic replays

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Invocation, Message, ModelConfig, ModelInvoker, TokenUsage};
use crate::error::{Result, RewindError};

/// Invoker used when no model layer is configured. Always fails.
pub struct StubModelInvoker;

#[async_trait]
impl ModelInvoker for StubModelInvoker {
    async fn invoke(&self, _transcript: &[Message], config: &ModelConfig) -> Result<Invocation> {
        Err(RewindError::Configuration(format!(
            "No model invoker configured for {}:{}. Implement the ModelInvoker trait for your provider",
            config.provider, config.model
        )))
    }
}

/// Predetermined outcome for a scripted call
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Return this invocation
    Respond(Invocation),
    /// Fail with a provider error
    ProviderError(String),
    /// Fail with a rate-limit error
    RateLimited(Option<Duration>),
}

impl ScriptedOutcome {
    /// Successful response with the given content, usage and cost
    pub fn respond(content: impl Into<String>, usage: TokenUsage, cost: Option<f64>) -> Self {
        ScriptedOutcome::Respond(Invocation {
            content: content.into(),
            usage,
            cost,
        })
    }
}

#[derive(Debug, Clone)]
struct ScriptedStep {
    outcome: ScriptedOutcome,
    delay: Duration,
}

/// A recorded call made against a [`ScriptedInvoker`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub transcript: Vec<Message>,
    pub config: ModelConfig,
}

/// Invoker that plays back a queue of outcomes and records every call.
///
/// When the queue is exhausted, calls fail with a provider error.
#[derive(Clone, Default)]
pub struct ScriptedInvoker {
    steps: Arc<Mutex<VecDeque<ScriptedStep>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome that is returned immediately
    pub async fn push(&self, outcome: ScriptedOutcome) {
        self.push_delayed(outcome, Duration::ZERO).await;
    }

    /// Queue an outcome that is returned after a simulated delay
    pub async fn push_delayed(&self, outcome: ScriptedOutcome, delay: Duration) {
        self.steps
            .lock()
            .await
            .push_back(ScriptedStep { outcome, delay });
    }

    /// All calls received so far
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Number of calls received so far
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, transcript: &[Message], config: &ModelConfig) -> Result<Invocation> {
        self.calls.lock().await.push(RecordedCall {
            transcript: transcript.to_vec(),
            config: config.clone(),
        });

        let step = self.steps.lock().await.pop_front();
        let Some(step) = step else {
            return Err(RewindError::Provider(
                "scripted invoker has no outcomes left".to_string(),
            ));
        };

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.outcome {
            ScriptedOutcome::Respond(invocation) => Ok(invocation),
            ScriptedOutcome::ProviderError(message) => Err(RewindError::Provider(message)),
            ScriptedOutcome::RateLimited(retry_after) => Err(RewindError::RateLimit { retry_after }),
        }
    }
}
