use super::*;
use crate::config::ReplayConfig;
use crate::error::{CostIncurred, ErrorKind, Result, RewindError};
use crate::events::{EventId, LlmRequestPayload, LlmResponsePayload, NewEvent, ToolCallPayload};
use crate::llm::{Message, ScriptedInvoker, ScriptedOutcome};
use crate::pricing::PricingTable;
use crate::store::{
    DeletePredicate, EventBackend, EventRecord, EventStore, IndexQuery,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

fn engine_with(store: &EventStore, invoker: &ScriptedInvoker, config: ReplayConfig) -> ReplayEngine {
    ReplayEngine::new(
        store.clone(),
        Arc::new(invoker.clone()),
        PricingTable::new(),
        config,
    )
}

fn engine(store: &EventStore, invoker: &ScriptedInvoker) -> ReplayEngine {
    engine_with(store, invoker, ReplayConfig::default())
}

fn cheap_model() -> ModelConfig {
    ModelConfig::new("openai", "gpt-4o-mini")
}

/// Request at 100, response (0.002) at 110, tool call at 120
async fn seed(store: &EventStore) -> (EventId, EventId) {
    let request = store
        .append(NewEvent::new(
            "a1",
            100,
            EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", "Plan a weekend in Lisbon")),
        ))
        .await
        .unwrap();
    let response = store
        .append(
            NewEvent::new(
                "a1",
                110,
                EventPayload::LlmResponse(
                    LlmResponsePayload::new(
                        "gpt-4o",
                        "Day 1: Alfama. Day 2: Belem.",
                        TokenUsage::new(150, 50),
                    )
                    .with_provider("openai")
                    .in_reply_to(request.clone()),
                ),
            )
            .with_cost(0.002),
        )
        .await
        .unwrap();
    store
        .append(NewEvent::new(
            "a1",
            120,
            EventPayload::ToolCall(ToolCallPayload::new("maps.route", json!({"to": "Belem"}))),
        ))
        .await
        .unwrap();
    (request, response)
}

fn failure(err: &RewindError) -> &crate::error::ReplayFailure {
    err.as_replay_failure()
        .unwrap_or_else(|| panic!("expected replay failure, got {:?}", err))
}

#[tokio::test]
async fn test_original_only_replay() {
    let store = EventStore::in_memory();
    let (request_id, response_id) = seed(&store).await;
    let invoker = ScriptedInvoker::new();

    let result = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 115))
        .await
        .unwrap();

    assert_eq!(result.outcome, ReplayOutcome::OriginalOnly);
    assert_eq!(result.source_agent_id, "a1");
    assert_eq!(result.replayed_from_timestamp, 115);
    assert_eq!(result.state.event_count, 2);
    assert_eq!(result.original_request_id, Some(request_id));

    let original = result.original_response.as_ref().unwrap();
    assert_eq!(original.event_id, Some(response_id));
    assert_eq!(original.content, "Day 1: Alfama. Day 2: Belem.");
    assert!((original.cost - 0.002).abs() < 1e-12);
    assert_eq!(original.usage.total(), 200);

    assert!(result.replayed_response.is_none());
    assert!(result.cost_delta.is_none());
    assert!(result.comparison().is_none());
    assert_eq!(invoker.call_count().await, 0);
}

#[tokio::test]
async fn test_reexecution_reports_cost_delta() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push(ScriptedOutcome::respond(
            "Day 1: Alfama. Day 2: Sintra.",
            TokenUsage::new(150, 40),
            Some(0.0005),
        ))
        .await;

    let result = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 115).with_alternate(cheap_model()))
        .await
        .unwrap();

    assert_eq!(result.outcome, ReplayOutcome::ReExecuted);
    let replayed = result.replayed_response.as_ref().unwrap();
    assert_eq!(replayed.model, "gpt-4o-mini");
    assert_eq!(replayed.provider.as_deref(), Some("openai"));
    assert!(replayed.event_id.is_none());
    assert!((result.cost_delta.unwrap() - 0.0015).abs() < 1e-12);

    let comparison = result.comparison().unwrap();
    assert!((comparison.cost_savings - 0.0015).abs() < 1e-12);
    assert!((comparison.cost_savings_percent.unwrap() - 75.0).abs() < 1e-9);
    assert!(!comparison.diff.is_identical());

    // Context stops at the original request; the recorded answer is not sent
    let calls = invoker.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].transcript, vec![Message::user("Plan a weekend in Lisbon")]);
    assert_eq!(calls[0].config, cheap_model());
}

#[tokio::test]
async fn test_alternate_system_prompt_is_applied() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push(ScriptedOutcome::respond("ok", TokenUsage::new(1, 1), Some(0.0)))
        .await;

    engine(&store, &invoker)
        .replay(
            ReplayRequest::new("a1", 115)
                .with_alternate(cheap_model().with_system_prompt("Answer in one line")),
        )
        .await
        .unwrap();

    let calls = invoker.calls().await;
    assert_eq!(
        calls[0].transcript,
        vec![
            Message::system("Answer in one line"),
            Message::user("Plan a weekend in Lisbon"),
        ]
    );
}

#[tokio::test]
async fn test_resent_history_does_not_leak_original_answer() {
    let store = EventStore::in_memory();
    let first = store
        .append(NewEvent::new(
            "a1",
            100,
            EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", "Plan a trip")),
        ))
        .await
        .unwrap();
    store
        .append(NewEvent::new(
            "a1",
            110,
            EventPayload::LlmResponse(
                LlmResponsePayload::new("gpt-4o", "Step 1", TokenUsage::new(10, 2))
                    .in_reply_to(first),
            ),
        ))
        .await
        .unwrap();

    let mut follow_up = LlmRequestPayload::prompt("gpt-4o", "Plan a trip");
    follow_up.messages.push(Message::assistant("Step 1"));
    let second = store
        .append(NewEvent::new("a1", 120, EventPayload::LlmRequest(follow_up)))
        .await
        .unwrap();
    store
        .append(NewEvent::new(
            "a1",
            130,
            EventPayload::LlmResponse(
                LlmResponsePayload::new("gpt-4o", "Step 2: book flights", TokenUsage::new(12, 4))
                    .in_reply_to(second.clone()),
            ),
        ))
        .await
        .unwrap();

    let invoker = ScriptedInvoker::new();
    invoker
        .push(ScriptedOutcome::respond("Step 2: pack", TokenUsage::new(12, 3), Some(0.0)))
        .await;

    let result = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 140).with_alternate(cheap_model()))
        .await
        .unwrap();

    assert_eq!(result.original_request_id, Some(second));
    assert_eq!(
        result.original_response.unwrap().content,
        "Step 2: book flights"
    );
    let calls = invoker.calls().await;
    assert_eq!(
        calls[0].transcript,
        vec![Message::user("Plan a trip"), Message::assistant("Step 1")]
    );
}

#[tokio::test]
async fn test_uses_pricing_when_invoker_reports_no_cost() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push(ScriptedOutcome::respond(
            "short",
            TokenUsage::new(1_000_000, 0),
            None,
        ))
        .await;

    let result = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 115).with_alternate(cheap_model()))
        .await
        .unwrap();

    let replayed = result.replayed_response.unwrap();
    assert!((replayed.cost - 0.15).abs() < 1e-12);
}

#[tokio::test]
async fn test_response_after_target_is_paired() {
    let store = EventStore::in_memory();
    let (request_id, response_id) = seed(&store).await;

    // Target right at the request: its answer lies past the window
    let result = engine(&store, &ScriptedInvoker::new())
        .replay(ReplayRequest::new("a1", 100))
        .await
        .unwrap();

    assert_eq!(result.state.event_count, 1);
    assert_eq!(result.original_request_id, Some(request_id));
    assert_eq!(
        result.original_response.unwrap().event_id,
        Some(response_id)
    );
}

#[tokio::test]
async fn test_tracked_response_wins_over_order() {
    let store = EventStore::in_memory();
    let first = store
        .append(NewEvent::new(
            "a1",
            10,
            EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", "first")),
        ))
        .await
        .unwrap();
    let second = store
        .append(NewEvent::new(
            "a1",
            20,
            EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", "second")),
        ))
        .await
        .unwrap();
    // Answers arrive out of order
    store
        .append(NewEvent::new(
            "a1",
            30,
            EventPayload::LlmResponse(
                LlmResponsePayload::new("gpt-4o", "answer to first", TokenUsage::default())
                    .in_reply_to(first),
            ),
        ))
        .await
        .unwrap();
    store
        .append(NewEvent::new(
            "a1",
            40,
            EventPayload::LlmResponse(
                LlmResponsePayload::new("gpt-4o", "answer to second", TokenUsage::default())
                    .in_reply_to(second.clone()),
            ),
        ))
        .await
        .unwrap();

    let result = engine(&store, &ScriptedInvoker::new())
        .replay(ReplayRequest::new("a1", 35))
        .await
        .unwrap();

    assert_eq!(result.original_request_id, Some(second));
    assert_eq!(result.original_response.unwrap().content, "answer to second");
}

#[tokio::test]
async fn test_untracked_answer_of_later_request_is_not_paired() {
    let store = EventStore::in_memory();
    store
        .append(NewEvent::new(
            "a1",
            10,
            EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", "unanswered")),
        ))
        .await
        .unwrap();
    store
        .append(NewEvent::new(
            "a1",
            20,
            EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", "answered")),
        ))
        .await
        .unwrap();
    store
        .append(NewEvent::new(
            "a1",
            30,
            EventPayload::LlmResponse(LlmResponsePayload::new(
                "gpt-4o",
                "reply",
                TokenUsage::default(),
            )),
        ))
        .await
        .unwrap();

    // At 15 the latest request is "unanswered"; "reply" follows a later request
    let result = engine(&store, &ScriptedInvoker::new())
        .replay(ReplayRequest::new("a1", 15))
        .await
        .unwrap();
    assert!(result.original_request_id.is_some());
    assert!(result.original_response.is_none());

    let result = engine(&store, &ScriptedInvoker::new())
        .replay(ReplayRequest::new("a1", 25))
        .await
        .unwrap();
    assert_eq!(result.original_response.unwrap().content, "reply");
}

#[tokio::test]
async fn test_original_is_stable_across_runs() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push(ScriptedOutcome::respond("one", TokenUsage::new(5, 5), Some(0.001)))
        .await;
    invoker
        .push(ScriptedOutcome::respond("two", TokenUsage::new(5, 9), Some(0.001)))
        .await;
    let engine = engine(&store, &invoker);

    let first = engine
        .replay(ReplayRequest::new("a1", 115).with_alternate(cheap_model()))
        .await
        .unwrap();
    let second = engine
        .replay(ReplayRequest::new("a1", 115).with_alternate(cheap_model()))
        .await
        .unwrap();

    assert_eq!(first.original_response, second.original_response);
    assert_eq!(first.state.digest(), second.state.digest());
    assert_ne!(first.replayed_response, second.replayed_response);
}

#[tokio::test]
async fn test_window_over_limit_fails_in_seeding() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    let config = ReplayConfig {
        max_replay_events: 2,
        ..ReplayConfig::default()
    };

    let err = engine_with(&store, &invoker, config)
        .replay(ReplayRequest::new("a1", 200).with_alternate(cheap_model()))
        .await
        .unwrap_err();

    let failure = failure(&err);
    assert_eq!(failure.stage, ReplayStage::Seeding);
    assert!(matches!(
        failure.cause,
        RewindError::ReplayTooLarge { count: 3, limit: 2 }
    ));
    assert_eq!(failure.cost_incurred, CostIncurred::None);
    assert_eq!(invoker.call_count().await, 0);
}

#[tokio::test]
async fn test_provider_error_keeps_original() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push(ScriptedOutcome::ProviderError("model overloaded".to_string()))
        .await;

    let err = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 115).with_alternate(cheap_model()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ReplayFailed);
    let failure = failure(&err);
    assert_eq!(failure.stage, ReplayStage::ReExecuting);
    assert_eq!(failure.cause.kind(), ErrorKind::Provider);
    assert_eq!(failure.cost_incurred, CostIncurred::Unknown);
    assert_eq!(
        failure.original_response.as_ref().unwrap().content,
        "Day 1: Alfama. Day 2: Belem."
    );

    // Single attempt, no retry
    assert_eq!(invoker.call_count().await, 1);
}

#[tokio::test]
async fn test_rate_limit_is_surfaced() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker.push(ScriptedOutcome::RateLimited(None)).await;

    let err = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 115).with_alternate(cheap_model()))
        .await
        .unwrap_err();

    assert_eq!(failure(&err).cause.kind(), ErrorKind::RateLimit);
}

#[tokio::test(start_paused = true)]
async fn test_reexecution_timeout() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push_delayed(
            ScriptedOutcome::respond("late", TokenUsage::new(1, 1), Some(0.001)),
            Duration::from_secs(30),
        )
        .await;

    let err = engine(&store, &invoker)
        .replay(
            ReplayRequest::new("a1", 115)
                .with_alternate(cheap_model())
                .with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();

    let failure = failure(&err);
    assert_eq!(failure.stage, ReplayStage::ReExecuting);
    assert!(matches!(failure.cause, RewindError::Timeout(d) if d == Duration::from_secs(2)));
    assert_eq!(failure.cost_incurred, CostIncurred::Unknown);
    assert!(failure.original_response.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_from_config() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push_delayed(
            ScriptedOutcome::respond("late", TokenUsage::new(1, 1), None),
            Duration::from_secs(120),
        )
        .await;
    let config = ReplayConfig {
        reexecution_timeout: Duration::from_secs(5),
        ..ReplayConfig::default()
    };

    let err = engine_with(&store, &invoker, config)
        .replay(ReplayRequest::new("a1", 115).with_alternate(cheap_model()))
        .await
        .unwrap_err();

    assert!(matches!(failure(&err).cause, RewindError::Timeout(d) if d == Duration::from_secs(5)));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    let token = CancellationToken::new();
    token.cancel();

    let err = engine(&store, &invoker)
        .replay(
            ReplayRequest::new("a1", 115)
                .with_alternate(cheap_model())
                .with_cancellation(token),
        )
        .await
        .unwrap_err();

    let failure = failure(&err);
    assert_eq!(failure.stage, ReplayStage::Seeding);
    assert_eq!(failure.cause.kind(), ErrorKind::Cancelled);
    assert_eq!(failure.cost_incurred, CostIncurred::None);
    assert_eq!(invoker.call_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_during_reexecution() {
    let store = EventStore::in_memory();
    seed(&store).await;
    let invoker = ScriptedInvoker::new();
    invoker
        .push_delayed(
            ScriptedOutcome::respond("never seen", TokenUsage::new(1, 1), Some(0.001)),
            Duration::from_secs(30),
        )
        .await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = engine(&store, &invoker)
        .replay(
            ReplayRequest::new("a1", 115)
                .with_alternate(cheap_model())
                .with_cancellation(token),
        )
        .await
        .unwrap_err();

    let failure = failure(&err);
    assert_eq!(failure.stage, ReplayStage::ReExecuting);
    assert_eq!(failure.cause.kind(), ErrorKind::Cancelled);
    assert_eq!(failure.cost_incurred, CostIncurred::Unknown);
    assert!(failure.original_response.is_some());
    assert_eq!(invoker.call_count().await, 1);
}

#[tokio::test]
async fn test_reexecution_without_request_is_not_found() {
    let store = EventStore::in_memory();
    store
        .append(NewEvent::new(
            "a1",
            10,
            EventPayload::ToolCall(ToolCallPayload::new("fs.list", json!({}))),
        ))
        .await
        .unwrap();
    let invoker = ScriptedInvoker::new();

    // Fine without re-execution
    let result = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 10))
        .await
        .unwrap();
    assert!(result.original_request_id.is_none());
    assert!(result.original_response.is_none());

    let err = engine(&store, &invoker)
        .replay(ReplayRequest::new("a1", 10).with_alternate(cheap_model()))
        .await
        .unwrap_err();
    let failure = failure(&err);
    assert_eq!(failure.stage, ReplayStage::ReExecuting);
    assert_eq!(failure.cause.kind(), ErrorKind::NotFound);
    assert_eq!(failure.cost_incurred, CostIncurred::None);
    assert_eq!(invoker.call_count().await, 0);
}

#[tokio::test]
async fn test_empty_agent_rejected() {
    let store = EventStore::in_memory();
    let err = engine(&store, &ScriptedInvoker::new())
        .replay(ReplayRequest::new("", 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

struct DownBackend;

#[async_trait]
impl EventBackend for DownBackend {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn insert(&self, _record: EventRecord) -> Result<Event> {
        Err(RewindError::StoreUnavailable("down".to_string()))
    }

    async fn get_by_id(&self, _id: &EventId) -> Result<Option<Event>> {
        Err(RewindError::StoreUnavailable("down".to_string()))
    }

    async fn query_by_index(&self, _query: &IndexQuery) -> Result<Vec<Event>> {
        Err(RewindError::StoreUnavailable("down".to_string()))
    }

    async fn delete_many(&self, _predicate: &DeletePredicate) -> Result<u64> {
        Err(RewindError::StoreUnavailable("down".to_string()))
    }
}

#[tokio::test]
async fn test_store_outage_fails_in_seeding() {
    let store = EventStore::new(Arc::new(DownBackend), Default::default());
    let err = engine(&store, &ScriptedInvoker::new())
        .replay(ReplayRequest::new("a1", 10))
        .await
        .unwrap_err();

    let failure = failure(&err);
    assert_eq!(failure.stage, ReplayStage::Seeding);
    assert_eq!(failure.cause.kind(), ErrorKind::StoreUnavailable);
}

#[tokio::test]
async fn test_replay_many_keeps_request_order() {
    let store = EventStore::in_memory();
    seed(&store).await;
    for agent in ["b1", "c1"] {
        store
            .append(NewEvent::new(
                agent,
                50,
                EventPayload::LlmRequest(LlmRequestPayload::prompt("gpt-4o", agent)),
            ))
            .await
            .unwrap();
    }

    let requests = vec![
        ReplayRequest::new("c1", 60),
        ReplayRequest::new("a1", 115),
        ReplayRequest::new("", 1),
        ReplayRequest::new("b1", 60),
    ];
    let results = engine(&store, &ScriptedInvoker::new())
        .replay_many(requests, Some(2))
        .await;

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().source_agent_id, "c1");
    assert_eq!(results[1].as_ref().unwrap().source_agent_id, "a1");
    assert!(results[2].is_err());
    assert_eq!(results[3].as_ref().unwrap().source_agent_id, "b1");
}

#[test]
fn test_stage_names() {
    assert_eq!(ReplayStage::ReExecuting.to_string(), "re_executing");
    assert_eq!(
        serde_json::to_value(ReplayStage::OriginalOnly).unwrap(),
        json!("original_only")
    );
}
