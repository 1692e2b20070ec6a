//! Replay state machine

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReplayOutcome, ReplayRequest, ReplayResult, ReplayStage, ResponseSnapshot};
use crate::config::ReplayConfig;
use crate::error::{CostIncurred, ReplayFailure, Result, RewindError};
use crate::events::{Event, EventKind, TimestampMs};
use crate::llm::{Invocation, Message, MessageRole, ModelConfig, ModelInvoker};
use crate::pricing::PricingTable;
use crate::reducer::{AgentState, reduce};
use crate::store::EventStore;

/// Reconstructs past agent state and re-executes recorded model calls.
///
/// Cheap to clone; clones share the store, invoker and pricing table.
#[derive(Clone)]
pub struct ReplayEngine {
    store: EventStore,
    invoker: Arc<dyn ModelInvoker>,
    pricing: Arc<PricingTable>,
    config: ReplayConfig,
}

impl std::fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

/// Request and response located for re-execution
struct Original<'a> {
    request: Option<&'a Event>,
    response: Option<ResponseSnapshot>,
}

impl ReplayEngine {
    pub fn new(
        store: EventStore,
        invoker: Arc<dyn ModelInvoker>,
        pricing: PricingTable,
        config: ReplayConfig,
    ) -> Self {
        Self {
            store,
            invoker,
            pricing: Arc::new(pricing),
            config,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Run one replay.
    ///
    /// Without an alternate configuration the result only carries the
    /// reconstructed state and the original response. With one, the original
    /// request is re-executed exactly once; there is no retry.
    pub async fn replay(&self, request: ReplayRequest) -> Result<ReplayResult> {
        if request.agent_id.trim().is_empty() {
            return Err(RewindError::Validation("agent_id is required".to_string()));
        }

        let agent_id = request.agent_id.as_str();
        let target = request.target_timestamp;
        let cancel = request.cancellation.clone().unwrap_or_default();
        let limit = self.config.max_replay_events;

        let fail = |stage: ReplayStage,
                    cause: RewindError,
                    original_response: Option<ResponseSnapshot>,
                    cost_incurred: CostIncurred| {
            warn!(agent_id, target, %stage, error = %cause, "Replay failed");
            RewindError::ReplayFailed(Box::new(ReplayFailure {
                agent_id: agent_id.to_string(),
                stage,
                cause,
                original_response,
                cost_incurred,
            }))
        };

        // Seeding
        debug!(agent_id, target, stage = %ReplayStage::Seeding, "Replay stage");
        let window = until_cancelled(&cancel, self.store.list_window(agent_id, target, limit))
            .await
            .map_err(|e| fail(ReplayStage::Seeding, e, None, CostIncurred::None))?;

        if window.len() > limit {
            return Err(fail(
                ReplayStage::Seeding,
                RewindError::ReplayTooLarge {
                    count: window.len(),
                    limit,
                },
                None,
                CostIncurred::None,
            ));
        }

        // Reconstructing
        debug!(
            agent_id,
            target,
            stage = %ReplayStage::Reconstructing,
            events = window.len(),
            "Replay stage"
        );
        if cancel.is_cancelled() {
            return Err(fail(
                ReplayStage::Reconstructing,
                RewindError::Cancelled,
                None,
                CostIncurred::None,
            ));
        }
        let state = reduce(&window, target);

        let original = until_cancelled(&cancel, self.locate_original(agent_id, target, &window))
            .await
            .map_err(|e| fail(ReplayStage::Reconstructing, e, None, CostIncurred::None))?;
        let original_request_id = original.request.map(|e| e.id.clone());

        let Some(alternate) = request.alternate.as_ref() else {
            debug!(agent_id, target, stage = %ReplayStage::OriginalOnly, "Replay stage");
            info!(
                agent_id,
                target,
                events = state.event_count,
                outcome = "original_only",
                "Replay completed"
            );
            return Ok(ReplayResult {
                source_agent_id: agent_id.to_string(),
                replayed_from_timestamp: target,
                state,
                original_request_id,
                original_response: original.response,
                replayed_response: None,
                cost_delta: None,
                outcome: ReplayOutcome::OriginalOnly,
                created_at: Utc::now(),
            });
        };

        // ReExecuting
        debug!(
            agent_id,
            target,
            stage = %ReplayStage::ReExecuting,
            provider = %alternate.provider,
            model = %alternate.model,
            "Replay stage"
        );
        let Some(original_request) = original.request else {
            return Err(fail(
                ReplayStage::ReExecuting,
                RewindError::NotFound(format!(
                    "no llm_request event for agent {} at or before {}",
                    agent_id, target
                )),
                None,
                CostIncurred::None,
            ));
        };

        if cancel.is_cancelled() {
            return Err(fail(
                ReplayStage::ReExecuting,
                RewindError::Cancelled,
                original.response,
                CostIncurred::None,
            ));
        }

        let context = replay_context(&state, original_request, alternate);
        let deadline = request.timeout.unwrap_or(self.config.reexecution_timeout);
        let invocation = self
            .reexecute(&context, alternate, deadline, &cancel)
            .await
            .map_err(|e| {
                fail(
                    ReplayStage::ReExecuting,
                    e,
                    original.response.clone(),
                    CostIncurred::Unknown,
                )
            })?;

        let cost = invocation
            .cost
            .filter(|c| c.is_finite() && *c >= 0.0)
            .unwrap_or_else(|| self.pricing.cost_for(alternate, &invocation.usage));

        let replayed = ResponseSnapshot {
            content: invocation.content,
            cost,
            usage: invocation.usage,
            model: alternate.model.clone(),
            provider: Some(alternate.provider.clone()),
            event_id: None,
        };
        let cost_delta = original.response.as_ref().map(|o| o.cost - replayed.cost);

        info!(
            agent_id,
            target,
            events = state.event_count,
            outcome = "re_executed",
            replayed_cost = replayed.cost,
            cost_delta = cost_delta.unwrap_or_default(),
            "Replay completed"
        );

        Ok(ReplayResult {
            source_agent_id: agent_id.to_string(),
            replayed_from_timestamp: target,
            state,
            original_request_id,
            original_response: original.response,
            replayed_response: Some(replayed),
            cost_delta,
            outcome: ReplayOutcome::ReExecuted,
            created_at: Utc::now(),
        })
    }

    /// Run independent replays concurrently, returning results in request order.
    ///
    /// `concurrency` defaults to the configured maximum.
    pub async fn replay_many(
        &self,
        requests: Vec<ReplayRequest>,
        concurrency: Option<usize>,
    ) -> Vec<Result<ReplayResult>> {
        let concurrency = concurrency
            .unwrap_or(self.config.max_concurrent_replays)
            .max(1);

        stream::iter(requests)
            .map(|request| self.replay(request))
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Latest request in the window and the response paired with it.
    ///
    /// A response carrying the request's id wins; otherwise the first untracked
    /// response after the request (before any later request) is used. The
    /// search continues past `target` when the window holds no answer.
    async fn locate_original<'a>(
        &self,
        agent_id: &str,
        target: TimestampMs,
        window: &'a [Event],
    ) -> Result<Original<'a>> {
        let Some(position) = window
            .iter()
            .rposition(|e| e.kind() == EventKind::LlmRequest)
        else {
            return Ok(Original {
                request: None,
                response: None,
            });
        };
        let request = &window[position];
        let after = &window[position + 1..];

        if let Some(found) = find_tracked(after, request) {
            return Ok(Original {
                request: Some(request),
                response: ResponseSnapshot::from_event(found),
            });
        }

        // A later request in the window closes the search for untracked answers
        let closed = after.iter().any(|e| e.kind() == EventKind::LlmRequest);
        let untracked = find_untracked(after).and_then(ResponseSnapshot::from_event);

        let ahead = self
            .store
            .list_from(
                agent_id,
                target.saturating_add(1),
                Some(self.store.limits().max_limit),
            )
            .await?;

        let response = match find_tracked(&ahead, request) {
            Some(found) => ResponseSnapshot::from_event(found),
            None if untracked.is_some() || closed => untracked,
            None => find_untracked(&ahead).and_then(ResponseSnapshot::from_event),
        };

        Ok(Original {
            request: Some(request),
            response,
        })
    }

    async fn reexecute(
        &self,
        context: &[Message],
        config: &ModelConfig,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Invocation> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RewindError::Cancelled),
            res = timeout(deadline, self.invoker.invoke(context, config)) => {
                match res {
                    Ok(result) => result,
                    Err(_) => Err(RewindError::Timeout(deadline)),
                }
            }
        }
    }
}

/// Race `fut` against cancellation
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RewindError::Cancelled),
        res = fut => res,
    }
}

fn find_tracked<'a>(events: &'a [Event], request: &Event) -> Option<&'a Event> {
    events.iter().find(|e| {
        e.payload
            .as_llm_response()
            .is_some_and(|r| r.request_id.as_ref() == Some(&request.id))
    })
}

/// First response with no request id, stopping at the next request
fn find_untracked(events: &[Event]) -> Option<&Event> {
    events
        .iter()
        .take_while(|e| e.kind() != EventKind::LlmRequest)
        .find(|e| {
            e.payload
                .as_llm_response()
                .is_some_and(|r| r.request_id.is_none())
        })
}

/// Transcript through the original request, with the alternate system prompt applied
fn replay_context(state: &AgentState, request: &Event, config: &ModelConfig) -> Vec<Message> {
    let mut context = state.context_through(&request.id);
    if let Some(prompt) = &config.system_prompt {
        match context.first_mut() {
            Some(first) if first.role == MessageRole::System => {
                first.content = prompt.clone();
            }
            _ => context.insert(0, Message::system(prompt.clone())),
        }
    }
    context
}
