//! Kind-specific event payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::{NamespacedKey, ToolName};
use super::{EventId, EventKind};
use crate::llm::{Message, TokenUsage};

/// Payload of an event. The variant determines the event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A model call was issued
    LlmRequest(LlmRequestPayload),

    /// A model call returned
    LlmResponse(LlmResponsePayload),

    /// A tool was invoked
    ToolCall(ToolCallPayload),

    /// The agent committed to a decision
    AgentDecision(AgentDecisionPayload),

    /// The agent's memory index changed
    MemoryOp(MemoryOpPayload),

    /// Something went wrong while the agent was running
    Error(ErrorPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::LlmRequest(_) => EventKind::LlmRequest,
            EventPayload::LlmResponse(_) => EventKind::LlmResponse,
            EventPayload::ToolCall(_) => EventKind::ToolCall,
            EventPayload::AgentDecision(_) => EventKind::AgentDecision,
            EventPayload::MemoryOp(_) => EventKind::MemoryOp,
            EventPayload::Error(_) => EventKind::Error,
        }
    }

    pub fn as_llm_request(&self) -> Option<&LlmRequestPayload> {
        match self {
            EventPayload::LlmRequest(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_llm_response(&self) -> Option<&LlmResponsePayload> {
        match self {
            EventPayload::LlmResponse(p) => Some(p),
            _ => None,
        }
    }
}

/// LLM request event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequestPayload {
    /// Model name
    pub model: String,

    /// Provider name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Messages sent with this request; may repeat the conversation so far
    pub messages: Vec<Message>,

    /// Temperature used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Max tokens setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmRequestPayload {
    /// A request carrying a single user prompt
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            messages: vec![Message::user(prompt)],
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// LLM response event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponsePayload {
    /// Model name
    pub model: String,

    /// Provider name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Generated content
    pub content: String,

    /// Token usage
    #[serde(default)]
    pub usage: TokenUsage,

    /// Id of the request event this answers, when the runtime tracked it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<EventId>,

    /// Stop reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl LlmResponsePayload {
    pub fn new(model: impl Into<String>, content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            model: model.into(),
            provider: None,
            content: content.into(),
            usage,
            request_id: None,
            stop_reason: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn in_reply_to(mut self, request_id: EventId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Tool call event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Tool name, namespaced by its source
    pub tool: ToolName,

    /// Input arguments
    #[serde(default)]
    pub arguments: Value,

    /// Result value, if the call completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Whether the tool reported failure
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallPayload {
    pub fn new(tool: impl Into<ToolName>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            result: None,
            is_error: false,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn failed(mut self, error: Value) -> Self {
        self.result = Some(error);
        self.is_error = true;
        self
    }
}

/// Agent decision event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDecisionPayload {
    /// What was decided
    pub decision: String,

    /// Why
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl AgentDecisionPayload {
    pub fn new(decision: impl Into<String>) -> Self {
        Self {
            decision: decision.into(),
            rationale: None,
        }
    }

    pub fn because(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Memory operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOperation {
    Add,
    Remove,
}

/// Memory operation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryOpPayload {
    pub op: MemoryOperation,
    pub key: NamespacedKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl MemoryOpPayload {
    pub fn add(key: impl Into<NamespacedKey>, value: Value) -> Self {
        Self {
            op: MemoryOperation::Add,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn remove(key: impl Into<NamespacedKey>) -> Self {
        Self {
            op: MemoryOperation::Remove,
            key: key.into(),
            value: None,
        }
    }
}

/// Error event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,

    /// Component that raised the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
