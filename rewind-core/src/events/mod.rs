//! Event data model
//!
//! An [`Event`] is the immutable record of one traceable agent action. Events
//! are created by the agent runtime as a [`NewEvent`], handed to the
//! [`EventStore`](crate::store::EventStore), and never modified afterwards.
//!
//! # Example
//!
//! ```rust
//! use rewind_core::events::{EventPayload, LlmRequestPayload, NewEvent};
//!
//! let event = NewEvent::new(
//!     "agent_1",
//!     1_700_000_000_000,
//!     EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", "Summarize the ticket")),
//! );
//! assert!(event.validate().is_ok());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, RewindError};

mod key;
mod payload;

pub use key::{NamespacedKey, ToolName};
pub use payload::{
    AgentDecisionPayload, ErrorPayload, EventPayload, LlmRequestPayload, LlmResponsePayload,
    MemoryOpPayload, MemoryOperation, ToolCallPayload,
};

/// Milliseconds since the Unix epoch
pub type TimestampMs = i64;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Store-assigned event identifier.
///
/// Ids are opaque and carry no ordering; use `(timestamp, sequence)` to order events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kinds of recorded agent actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LlmRequest,
    LlmResponse,
    ToolCall,
    AgentDecision,
    MemoryOp,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::LlmRequest,
        EventKind::LlmResponse,
        EventKind::ToolCall,
        EventKind::AgentDecision,
        EventKind::MemoryOp,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LlmRequest => "llm_request",
            EventKind::LlmResponse => "llm_response",
            EventKind::ToolCall => "tool_call",
            EventKind::AgentDecision => "agent_decision",
            EventKind::MemoryOp => "memory_op",
            EventKind::Error => "error",
        }
    }

    /// Parse the snake_case tag produced by [`EventKind::as_str`]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id assigned by the store
    pub id: EventId,

    /// Append sequence assigned by the store; breaks timestamp ties
    pub sequence: u64,

    /// Owning agent
    pub agent_id: String,

    /// When the action happened (ms since epoch)
    pub timestamp: TimestampMs,

    /// Kind-specific data
    pub payload: EventPayload,

    /// Cost in USD (0 for non-billed kinds)
    #[serde(default)]
    pub cost: f64,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Timestamp as a UTC datetime, if representable
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Store order: timestamp first, append sequence on ties
    pub fn order_key(&self) -> (TimestampMs, u64) {
        (self.timestamp, self.sequence)
    }

    /// True when this event carries the same caller-supplied content as `new`
    /// (everything except the store-assigned id and sequence).
    pub fn matches(&self, new: &NewEvent) -> bool {
        Some(self.timestamp) == new.timestamp
            && self.agent_id == new.agent_id
            && self.payload == new.payload
            && self.cost == new.cost.unwrap_or(0.0)
    }
}

/// An event as submitted by the agent runtime, before the store assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Owning agent (required)
    pub agent_id: String,

    /// When the action happened (required)
    pub timestamp: Option<TimestampMs>,

    /// Kind-specific data
    pub payload: EventPayload,

    /// Cost in USD; `None` means not billed
    #[serde(default)]
    pub cost: Option<f64>,
}

impl NewEvent {
    pub fn new(agent_id: impl Into<String>, timestamp: TimestampMs, payload: EventPayload) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp: Some(timestamp),
            payload,
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(RewindError::Validation("agent_id is required".to_string()));
        }

        match self.timestamp {
            None => {
                return Err(RewindError::Validation("timestamp is required".to_string()));
            }
            Some(ts) if ts < 0 => {
                return Err(RewindError::Validation(format!(
                    "timestamp must be non-negative, got {}",
                    ts
                )));
            }
            Some(_) => {}
        }

        if let Some(cost) = self.cost
            && (!cost.is_finite() || cost < 0.0)
        {
            return Err(RewindError::Validation(format!(
                "cost must be a finite non-negative amount, got {}",
                cost
            )));
        }

        Ok(())
    }
}
