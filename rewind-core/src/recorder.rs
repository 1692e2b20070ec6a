//! Capture helper for agent runtimes
//!
//! [`EventRecorder`] is bound to one agent and appends events on its behalf,
//! stamping them from a clock that never runs backwards and redacting secrets
//! from tool and memory data before anything is persisted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use crate::error::{Result, RewindError};
use crate::events::{
    AgentDecisionPayload, ErrorPayload, EventId, EventPayload, LlmRequestPayload,
    LlmResponsePayload, MemoryOpPayload, NewEvent, TimestampMs, ToolCallPayload, now_ms,
};
use crate::pricing::PricingTable;
use crate::store::EventStore;

const REDACTED: &str = "[REDACTED]";

static DEFAULT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)password",
        r"(?i)secret",
        r"(?i)api[_-]?key",
        r"(?i)token",
        r"(?i)authorization",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// How much of each event is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// Record everything as given (may include secrets)
    Full,

    /// Record with secret redaction in tool and memory data (default)
    #[default]
    Redacted,

    /// Record nothing
    Disabled,
}

/// Recorder behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub mode: RecordingMode,

    /// Extra regex patterns; keys or string values matching one are redacted
    pub redact_patterns: Vec<String>,

    /// Strings longer than this many characters are truncated in redacted mode
    pub max_data_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mode: RecordingMode::Redacted,
            redact_patterns: Vec::new(),
            max_data_size: 10_000,
        }
    }
}

#[derive(Debug)]
struct Redactor {
    extra: Vec<Regex>,
    max_data_size: usize,
}

impl Redactor {
    fn new(config: &RecorderConfig) -> Result<Self> {
        let extra = config
            .redact_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    RewindError::Configuration(format!("invalid redact pattern {:?}: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            extra,
            max_data_size: config.max_data_size,
        })
    }

    fn is_sensitive(&self, text: &str) -> bool {
        DEFAULT_PATTERNS
            .iter()
            .chain(&self.extra)
            .any(|re| re.is_match(text))
    }

    fn redact(&self, value: &Value) -> Value {
        match value {
            Value::String(s) if self.is_sensitive(s) => Value::String(REDACTED.to_string()),
            Value::String(s) => match s.char_indices().nth(self.max_data_size) {
                Some((cut, _)) => Value::String(format!(
                    "{}... [truncated, {} bytes total]",
                    &s[..cut],
                    s.len()
                )),
                None => value.clone(),
            },
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.is_sensitive(k) {
                            Value::String(REDACTED.to_string())
                        } else {
                            self.redact(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            _ => value.clone(),
        }
    }
}

/// Appends one agent's events to an [`EventStore`].
///
/// Every method returns `Ok(None)` without writing when recording is disabled.
#[derive(Clone)]
pub struct EventRecorder {
    store: EventStore,
    agent_id: String,
    mode: RecordingMode,
    redactor: Arc<Redactor>,
    pricing: Option<Arc<PricingTable>>,
    last_ms: Arc<AtomicI64>,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("agent_id", &self.agent_id)
            .field("mode", &self.mode)
            .finish()
    }
}

impl EventRecorder {
    /// Recorder with the default (redacted) configuration
    pub fn new(store: EventStore, agent_id: impl Into<String>) -> Self {
        Self {
            store,
            agent_id: agent_id.into(),
            mode: RecordingMode::default(),
            redactor: Arc::new(Redactor {
                extra: Vec::new(),
                max_data_size: RecorderConfig::default().max_data_size,
            }),
            pricing: None,
            last_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Recorder with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a redact pattern is not a valid regex.
    pub fn with_config(
        store: EventStore,
        agent_id: impl Into<String>,
        config: &RecorderConfig,
    ) -> Result<Self> {
        let mut recorder = Self::new(store, agent_id);
        recorder.mode = config.mode;
        recorder.redactor = Arc::new(Redactor::new(config)?);
        Ok(recorder)
    }

    /// Price responses recorded without an explicit cost
    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    /// Next timestamp: wall clock, but never earlier than the previous one
    fn next_timestamp(&self) -> TimestampMs {
        let now = now_ms();
        let previous = self.last_ms.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }

    async fn record(&self, payload: EventPayload, cost: Option<f64>) -> Result<Option<EventId>> {
        if self.mode == RecordingMode::Disabled {
            debug!(agent_id = %self.agent_id, kind = %payload.kind(), "Recording disabled, skipping event");
            return Ok(None);
        }

        let mut event = NewEvent::new(self.agent_id.clone(), self.next_timestamp(), payload);
        event.cost = cost;
        self.store.append(event).await.map(Some)
    }

    fn scrub(&self, value: Value) -> Value {
        match self.mode {
            RecordingMode::Redacted => self.redactor.redact(&value),
            _ => value,
        }
    }

    pub async fn record_llm_request(
        &self,
        request: LlmRequestPayload,
    ) -> Result<Option<EventId>> {
        self.record(EventPayload::LlmRequest(request), None).await
    }

    /// Record a model response.
    ///
    /// Without an explicit `cost`, the response is priced from its token usage
    /// when a pricing table is attached.
    pub async fn record_llm_response(
        &self,
        response: LlmResponsePayload,
        cost: Option<f64>,
    ) -> Result<Option<EventId>> {
        let cost = cost.or_else(|| self.price_response(&response));
        self.record(EventPayload::LlmResponse(response), cost).await
    }

    pub async fn record_tool_call(&self, mut call: ToolCallPayload) -> Result<Option<EventId>> {
        call.arguments = self.scrub(call.arguments);
        call.result = call.result.map(|r| self.scrub(r));
        self.record(EventPayload::ToolCall(call), None).await
    }

    pub async fn record_decision(
        &self,
        decision: impl Into<String>,
        rationale: Option<String>,
    ) -> Result<Option<EventId>> {
        let mut payload = AgentDecisionPayload::new(decision);
        payload.rationale = rationale;
        self.record(EventPayload::AgentDecision(payload), None).await
    }

    pub async fn record_memory_op(&self, mut op: MemoryOpPayload) -> Result<Option<EventId>> {
        op.value = op.value.map(|v| self.scrub(v));
        self.record(EventPayload::MemoryOp(op), None).await
    }

    pub async fn record_error(
        &self,
        message: impl Into<String>,
        source: Option<String>,
    ) -> Result<Option<EventId>> {
        let mut payload = ErrorPayload::new(message);
        payload.source = source;
        self.record(EventPayload::Error(payload), None).await
    }

    /// Cost from the attached table; unknown models stay unpriced
    fn price_response(&self, response: &LlmResponsePayload) -> Option<f64> {
        self.pricing.as_ref()?.known_cost(
            response.provider.as_deref(),
            &response.model,
            &response.usage,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, MemoryOperation};
    use crate::llm::TokenUsage;
    use crate::store::EventQuery;
    use serde_json::json;

    async fn only_event(store: &EventStore, agent: &str) -> crate::events::Event {
        let mut events = store.list_by_agent(agent, EventQuery::new()).await.unwrap();
        assert_eq!(events.len(), 1);
        events.remove(0)
    }

    #[tokio::test]
    async fn test_redacts_tool_arguments() {
        let store = EventStore::in_memory();
        let recorder = EventRecorder::new(store.clone(), "a1");

        recorder
            .record_tool_call(
                ToolCallPayload::new(
                    "http.get",
                    json!({
                        "url": "https://example.com",
                        "headers": {"Authorization": "Bearer abc"},
                        "api_key": "sk-123",
                        "note": "my password is hunter2"
                    }),
                )
                .with_result(json!({"status": 200})),
            )
            .await
            .unwrap();

        let event = only_event(&store, "a1").await;
        let EventPayload::ToolCall(call) = event.payload else {
            panic!("expected tool call");
        };
        assert_eq!(call.arguments["url"], json!("https://example.com"));
        assert_eq!(call.arguments["headers"]["Authorization"], json!(REDACTED));
        assert_eq!(call.arguments["api_key"], json!(REDACTED));
        assert_eq!(call.arguments["note"], json!(REDACTED));
        assert_eq!(call.result, Some(json!({"status": 200})));
    }

    #[tokio::test]
    async fn test_full_mode_keeps_values() {
        let store = EventStore::in_memory();
        let config = RecorderConfig {
            mode: RecordingMode::Full,
            ..RecorderConfig::default()
        };
        let recorder = EventRecorder::with_config(store.clone(), "a1", &config).unwrap();

        recorder
            .record_memory_op(MemoryOpPayload::add("creds", json!({"password": "pw"})))
            .await
            .unwrap();

        let event = only_event(&store, "a1").await;
        let EventPayload::MemoryOp(op) = event.payload else {
            panic!("expected memory op");
        };
        assert_eq!(op.op, MemoryOperation::Add);
        assert_eq!(op.value, Some(json!({"password": "pw"})));
    }

    #[tokio::test]
    async fn test_disabled_writes_nothing() {
        let store = EventStore::in_memory();
        let config = RecorderConfig {
            mode: RecordingMode::Disabled,
            ..RecorderConfig::default()
        };
        let recorder = EventRecorder::with_config(store.clone(), "a1", &config).unwrap();

        let id = recorder.record_decision("search", None).await.unwrap();
        assert!(id.is_none());
        assert_eq!(store.stats("a1").await.unwrap().total_events, 0);
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let store = EventStore::in_memory();
        let recorder = EventRecorder::new(store.clone(), "a1");
        recorder.last_ms.store(i64::MAX / 2, Ordering::SeqCst);

        recorder.record_decision("first", None).await.unwrap();
        recorder.record_error("boom", Some("tool".to_string())).await.unwrap();

        let events = store.list_by_agent("a1", EventQuery::new()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.timestamp == i64::MAX / 2));
        assert_eq!(events[0].kind(), EventKind::AgentDecision);
        assert_eq!(events[1].kind(), EventKind::Error);
    }

    #[tokio::test]
    async fn test_prices_responses_without_cost() {
        let store = EventStore::in_memory();
        let recorder =
            EventRecorder::new(store.clone(), "a1").with_pricing(Arc::new(PricingTable::new()));

        let response = LlmResponsePayload::new("gpt-4o-mini", "ok", TokenUsage::new(1_000_000, 0))
            .with_provider("openai");
        recorder.record_llm_response(response, None).await.unwrap();

        let event = only_event(&store, "a1").await;
        assert!((event.cost - 0.15).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_prices_provider_less_response_by_model() {
        let store = EventStore::in_memory();
        let recorder =
            EventRecorder::new(store.clone(), "a1").with_pricing(Arc::new(PricingTable::new()));

        let response = LlmResponsePayload::new("gpt-4o", "ok", TokenUsage::new(1_000_000, 0));
        recorder.record_llm_response(response, None).await.unwrap();

        let event = only_event(&store, "a1").await;
        assert!((event.cost - 2.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unknown_model_is_not_priced() {
        let store = EventStore::in_memory();
        let recorder =
            EventRecorder::new(store.clone(), "a1").with_pricing(Arc::new(PricingTable::new()));

        let response =
            LlmResponsePayload::new("in-house-7b", "ok", TokenUsage::new(1_000_000, 1_000_000))
                .with_provider("acme");
        recorder.record_llm_response(response, None).await.unwrap();

        let event = only_event(&store, "a1").await;
        assert_eq!(event.cost, 0.0);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let config = RecorderConfig {
            redact_patterns: vec!["(".to_string()],
            ..RecorderConfig::default()
        };
        let err = EventRecorder::with_config(EventStore::in_memory(), "a1", &config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_long_strings_truncated() {
        let redactor = Redactor {
            extra: Vec::new(),
            max_data_size: 4,
        };
        let value = redactor.redact(&json!("abcdefgh"));
        assert_eq!(value, json!("abcd... [truncated, 8 bytes total]"));
    }
}
