//! Replay Engine
//!
//! A replay reconstructs an agent's state at a past timestamp and, when an
//! alternate [`ModelConfig`] is supplied, re-executes the model call recorded
//! at that point so the two responses can be compared.
//!
//! Each replay walks a small state machine:
//!
//! ```text
//! Seeding -> Reconstructing -> (OriginalOnly | ReExecuting) -> Completed | Failed
//! ```
//!
//! A replay never writes to the event store. Failures are reported as
//! [`RewindError::ReplayFailed`](crate::error::RewindError::ReplayFailed) with the
//! failing stage, the cause, and the original response when it was found.
//!
//! # Example
//!
//! ```rust,no_run
//! use rewind_core::llm::ModelConfig;
//! use rewind_core::replay::{ReplayEngine, ReplayRequest};
//!
//! # async fn run(engine: ReplayEngine) -> rewind_core::error::Result<()> {
//! let request = ReplayRequest::new("agent_1", 1_700_000_000_000)
//!     .with_alternate(ModelConfig::new("openai", "gpt-4o-mini"));
//!
//! let result = engine.replay(request).await?;
//! if let Some(comparison) = result.comparison() {
//!     println!("saved ${:.4}", comparison.cost_savings);
//! }
//! # Ok(())
//! # }
//! ```

mod engine;

#[cfg(test)]
mod tests;

pub use engine::ReplayEngine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::compare::{ComparisonResult, compare};
use crate::events::{Event, EventId, EventPayload, TimestampMs};
use crate::llm::{ModelConfig, TokenUsage};
use crate::reducer::AgentState;

/// Stages of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStage {
    Seeding,
    Reconstructing,
    OriginalOnly,
    ReExecuting,
    Completed,
    Failed,
}

impl ReplayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayStage::Seeding => "seeding",
            ReplayStage::Reconstructing => "reconstructing",
            ReplayStage::OriginalOnly => "original_only",
            ReplayStage::ReExecuting => "re_executing",
            ReplayStage::Completed => "completed",
            ReplayStage::Failed => "failed",
        }
    }
}

impl fmt::Display for ReplayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one replay
#[derive(Debug, Clone)]
pub struct ReplayRequest {
    pub agent_id: String,
    /// Reconstruct state as of this time (inclusive)
    pub target_timestamp: TimestampMs,
    /// Re-execute the original model call under this configuration
    pub alternate: Option<ModelConfig>,
    /// Deadline for the re-execution; the engine default applies when unset
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl ReplayRequest {
    pub fn new(agent_id: impl Into<String>, target_timestamp: TimestampMs) -> Self {
        Self {
            agent_id: agent_id.into(),
            target_timestamp,
            alternate: None,
            timeout: None,
            cancellation: None,
        }
    }

    pub fn with_alternate(mut self, config: ModelConfig) -> Self {
        self.alternate = Some(config);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// A model response as seen by a replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub content: String,
    /// Cost in USD
    pub cost: f64,
    pub usage: TokenUsage,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Source event; `None` for fresh re-executions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
}

impl ResponseSnapshot {
    /// Snapshot of a stored response event; `None` for other kinds
    pub fn from_event(event: &Event) -> Option<Self> {
        match &event.payload {
            EventPayload::LlmResponse(response) => Some(Self {
                content: response.content.clone(),
                cost: event.cost,
                usage: response.usage,
                model: response.model.clone(),
                provider: response.provider.clone(),
                event_id: Some(event.id.clone()),
            }),
            _ => None,
        }
    }
}

/// How a completed replay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// State reconstructed, no model call issued
    OriginalOnly,
    /// The original call was re-executed under the alternate configuration
    ReExecuted,
}

/// Output of a successful replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub source_agent_id: String,
    pub replayed_from_timestamp: TimestampMs,
    /// Reconstructed state at the target timestamp
    pub state: AgentState,
    /// The request event the original response answers
    pub original_request_id: Option<EventId>,
    pub original_response: Option<ResponseSnapshot>,
    pub replayed_response: Option<ResponseSnapshot>,
    /// `original.cost - replayed.cost`, when both exist
    pub cost_delta: Option<f64>,
    pub outcome: ReplayOutcome,
    pub created_at: DateTime<Utc>,
}

impl ReplayResult {
    /// Compare original and replayed responses, when both exist
    pub fn comparison(&self) -> Option<ComparisonResult> {
        match (&self.original_response, &self.replayed_response) {
            (Some(original), Some(replayed)) => Some(compare(original, replayed)),
            _ => None,
        }
    }
}
