//! Error types for Rewind operations

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::replay::{ReplayStage, ResponseSnapshot};

/// Result type for Rewind operations
pub type Result<T> = std::result::Result<T, RewindError>;

/// Error types for the event store and replay engine
#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    /// Malformed input rejected before anything was persisted
    #[error("Validation error: {0}")]
    Validation(String),

    /// Lookup of a missing event or agent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Replay window holds more events than the safety bound allows
    #[error("Replay window too large: {count} events exceeds limit of {limit}")]
    ReplayTooLarge { count: usize, limit: usize },

    /// Model provider returned an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Model provider rejected the call for rate limiting
    #[error("Rate limited by provider{}", format_retry_after(retry_after))]
    RateLimit { retry_after: Option<Duration> },

    /// Underlying persistence is unreachable or failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Operation exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Operation was cancelled by the caller
    #[error("Cancelled")]
    Cancelled,

    /// A replay failed at a specific stage
    #[error("{0}")]
    ReplayFailed(Box<ReplayFailure>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {:?})", d),
        None => String::new(),
    }
}

impl RewindError {
    /// Stable tag for this error, suitable for API responses
    pub fn kind(&self) -> ErrorKind {
        match self {
            RewindError::Validation(_) => ErrorKind::Validation,
            RewindError::NotFound(_) => ErrorKind::NotFound,
            RewindError::ReplayTooLarge { .. } => ErrorKind::ReplayTooLarge,
            RewindError::Provider(_) => ErrorKind::Provider,
            RewindError::RateLimit { .. } => ErrorKind::RateLimit,
            RewindError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            RewindError::Timeout(_) => ErrorKind::Timeout,
            RewindError::Cancelled => ErrorKind::Cancelled,
            RewindError::ReplayFailed(_) => ErrorKind::ReplayFailed,
            RewindError::Configuration(_) => ErrorKind::Configuration,
            RewindError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Structured form of this error for callers that serialize failures
    pub fn report(&self) -> ErrorReport {
        let (stage, cost_incurred) = match self {
            RewindError::ReplayFailed(failure) => {
                (Some(failure.stage), Some(failure.cost_incurred))
            }
            _ => (None, None),
        };

        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            stage,
            cost_incurred,
        }
    }

    /// The replay failure details, if this is a replay failure
    pub fn as_replay_failure(&self) -> Option<&ReplayFailure> {
        match self {
            RewindError::ReplayFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Stable error tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    ReplayTooLarge,
    Provider,
    RateLimit,
    StoreUnavailable,
    Timeout,
    Cancelled,
    ReplayFailed,
    Configuration,
    Serialization,
}

/// Serializable error summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ReplayStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_incurred: Option<CostIncurred>,
}

/// Whether a failed replay may have been billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostIncurred {
    /// Failed before any model call was dispatched
    None,
    /// A model call was dispatched; its cost is not known
    Unknown,
}

/// Details of a replay that ended in the `Failed` stage.
///
/// `original_response` is kept whenever reconstruction got far enough to find
/// it, so callers can still show what the agent originally produced.
#[derive(Debug)]
pub struct ReplayFailure {
    pub agent_id: String,
    pub stage: ReplayStage,
    pub cause: RewindError,
    pub original_response: Option<ResponseSnapshot>,
    pub cost_incurred: CostIncurred,
}

impl std::fmt::Display for ReplayFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Replay for agent {} failed during {}: {}",
            self.agent_id, self.stage, self.cause
        )
    }
}
