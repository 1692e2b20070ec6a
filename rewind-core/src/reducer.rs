//! State Reducer
//!
//! [`reduce`] folds an ordered event sequence into an [`AgentState`] snapshot as
//! of a timestamp. The fold is pure: it reads no clock, draws no randomness and
//! keeps every keyed collection ordered, so identical input always yields an
//! identical state and [`AgentState::digest`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::events::{
    Event, EventId, EventPayload, MemoryOperation, TimestampMs, ToolName,
};
use crate::llm::{Message, MessageRole};

/// One transcript message and the event it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub event_id: EventId,
    pub message: Message,
}

/// Transcript length right after a model request was folded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMark {
    pub event_id: EventId,
    pub context_len: usize,
}

/// A tool call observed in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub event_id: EventId,
    pub timestamp: TimestampMs,
    pub tool: ToolName,
    pub arguments: Value,
    pub result: Option<Value>,
    pub is_error: bool,
    /// Nearest preceding decision, if any
    pub decision_event_id: Option<EventId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub event_id: EventId,
    pub timestamp: TimestampMs,
    pub decision: String,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub event_id: EventId,
    pub timestamp: TimestampMs,
    pub message: String,
    pub source: Option<String>,
}

/// Point-in-time projection of an agent's log
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// Fold cutoff (inclusive)
    pub as_of: TimestampMs,
    pub transcript: Vec<TranscriptEntry>,
    /// End of each request's context within `transcript`
    pub request_marks: Vec<RequestMark>,
    pub tool_calls: Vec<ToolRecord>,
    /// Memory index keyed by qualified key
    pub memory: BTreeMap<String, Value>,
    pub last_decision: Option<DecisionRecord>,
    pub errors: Vec<ErrorRecord>,
    /// Sum of every folded event's cost
    pub total_cost: f64,
    /// Cost of folded model responses
    pub llm_cost: f64,
    pub event_count: u64,
    pub last_event_id: Option<EventId>,
}

impl AgentState {
    fn empty(as_of: TimestampMs) -> Self {
        Self {
            as_of,
            ..Self::default()
        }
    }

    /// Transcript as model messages
    pub fn context_messages(&self) -> Vec<Message> {
        self.transcript.iter().map(|e| e.message.clone()).collect()
    }

    /// Transcript as it stood once `event_id` was folded.
    ///
    /// For a request this is exactly the context it was sent with, even when
    /// it only resent earlier messages. Unknown events yield the full transcript.
    pub fn context_through(&self, event_id: &EventId) -> Vec<Message> {
        if let Some(mark) = self.request_marks.iter().rev().find(|m| &m.event_id == event_id) {
            return self
                .transcript
                .iter()
                .take(mark.context_len)
                .map(|e| e.message.clone())
                .collect();
        }
        match self.transcript.iter().rposition(|e| &e.event_id == event_id) {
            Some(last) => self.transcript[..=last]
                .iter()
                .map(|e| e.message.clone())
                .collect(),
            None => self.context_messages(),
        }
    }

    /// Hex SHA-256 of the canonical JSON encoding
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        // Serializing plain data with ordered maps cannot fail
        if let Ok(bytes) = serde_json::to_vec(self) {
            hasher.update(&bytes);
        }
        format!("{:x}", hasher.finalize())
    }

    fn transcript_starts(&self, messages: &[Message]) -> bool {
        self.transcript.len() <= messages.len()
            && self
                .transcript
                .iter()
                .zip(messages)
                .all(|(entry, message)| &entry.message == message)
    }

    fn apply(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::LlmRequest(request) => {
                // Requests usually resend the conversation so far; keep only what is new
                let skip = if self.transcript_starts(&request.messages) {
                    self.transcript.len()
                } else {
                    0
                };
                for message in &request.messages[skip..] {
                    self.transcript.push(TranscriptEntry {
                        event_id: event.id.clone(),
                        message: message.clone(),
                    });
                }
                self.request_marks.push(RequestMark {
                    event_id: event.id.clone(),
                    context_len: self.transcript.len(),
                });
            }
            EventPayload::LlmResponse(response) => {
                self.transcript.push(TranscriptEntry {
                    event_id: event.id.clone(),
                    message: Message {
                        role: MessageRole::Assistant,
                        content: response.content.clone(),
                    },
                });
                self.llm_cost += event.cost;
            }
            EventPayload::ToolCall(call) => {
                self.tool_calls.push(ToolRecord {
                    event_id: event.id.clone(),
                    timestamp: event.timestamp,
                    tool: call.tool.clone(),
                    arguments: call.arguments.clone(),
                    result: call.result.clone(),
                    is_error: call.is_error,
                    decision_event_id: self.last_decision.as_ref().map(|d| d.event_id.clone()),
                });
            }
            EventPayload::AgentDecision(decision) => {
                self.last_decision = Some(DecisionRecord {
                    event_id: event.id.clone(),
                    timestamp: event.timestamp,
                    decision: decision.decision.clone(),
                    rationale: decision.rationale.clone(),
                });
            }
            EventPayload::MemoryOp(op) => match op.op {
                MemoryOperation::Add => {
                    self.memory.insert(
                        op.key.qualified(),
                        op.value.clone().unwrap_or(Value::Null),
                    );
                }
                MemoryOperation::Remove => {
                    self.memory.remove(&op.key.qualified());
                }
            },
            EventPayload::Error(error) => {
                self.errors.push(ErrorRecord {
                    event_id: event.id.clone(),
                    timestamp: event.timestamp,
                    message: error.message.clone(),
                    source: error.source.clone(),
                });
            }
        }

        self.total_cost += event.cost;
        self.event_count += 1;
        self.last_event_id = Some(event.id.clone());
    }
}

/// Fold `events` with `timestamp <= as_of`, in input order.
///
/// Errors recorded in the log are data here: they are collected into
/// [`AgentState::errors`] and the fold continues.
pub fn reduce(events: &[Event], as_of: TimestampMs) -> AgentState {
    let mut state = AgentState::empty(as_of);
    for event in events.iter().filter(|e| e.timestamp <= as_of) {
        state.apply(event);
    }
    state
}
