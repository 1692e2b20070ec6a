//! Event Store
//!
//! [`EventStore`] is the durable, ordered, per-agent log of [`Event`]s. It is an
//! explicitly constructed handle around an [`EventBackend`]; cloning it is cheap
//! and every clone shares the same backend and stats cache.
//!
//! Range queries observe events in `(timestamp, sequence)` order, where the
//! sequence is assigned by the backend on append. Event ids are never used for
//! ordering.
//!
//! # Example
//!
//! ```rust
//! use rewind_core::events::{AgentDecisionPayload, EventPayload, NewEvent};
//! use rewind_core::store::{EventQuery, EventStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> rewind_core::error::Result<()> {
//! let store = EventStore::in_memory();
//! let id = store
//!     .append(NewEvent::new(
//!         "agent_1",
//!         100,
//!         EventPayload::AgentDecision(AgentDecisionPayload::new("search docs")),
//!     ))
//!     .await?;
//!
//! let events = store.list_by_agent("agent_1", EventQuery::new()).await?;
//! assert_eq!(events[0].id, id);
//! # Ok(())
//! # }
//! ```

mod backend;
mod memory;
#[cfg(feature = "store-surrealdb")]
mod surreal;


pub use backend::{DeletePredicate, EventBackend, EventRecord, IndexQuery, SortOrder};
pub use memory::InMemoryBackend;
#[cfg(feature = "store-surrealdb")]
pub use surreal::SurrealBackend;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::QueryLimits;
use crate::error::{Result, RewindError};
use crate::events::{Event, EventId, EventKind, NewEvent, TimestampMs};

/// Filters for [`EventStore::list_by_agent`]. All filters are AND-combined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    /// Kinds to include; empty means every kind
    pub kinds: Vec<EventKind>,
    /// Inclusive lower bound
    pub start_time: Option<TimestampMs>,
    /// Inclusive upper bound
    pub end_time: Option<TimestampMs>,
    /// Result cap; defaults to the store's default limit
    pub limit: Option<usize>,
    pub order: SortOrder,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        for kind in kinds {
            self = self.kind(kind);
        }
        self
    }

    pub fn since(mut self, start_time: TimestampMs) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn until(mut self, end_time: TimestampMs) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }
}

/// Aggregate view of one agent's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub agent_id: String,
    pub total_events: u64,
    pub total_cost: f64,
    pub event_type_counts: BTreeMap<EventKind, u64>,
    pub oldest_event_time: Option<TimestampMs>,
    pub newest_event_time: Option<TimestampMs>,
}

impl EventStats {
    fn empty(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            total_events: 0,
            total_cost: 0.0,
            event_type_counts: BTreeMap::new(),
            oldest_event_time: None,
            newest_event_time: None,
        }
    }

    /// Number of events of one kind
    pub fn count_of(&self, kind: EventKind) -> u64 {
        self.event_type_counts.get(&kind).copied().unwrap_or(0)
    }

    fn from_events(agent_id: &str, events: &[Event]) -> Self {
        let mut stats = Self::empty(agent_id);
        for event in events {
            stats.total_events += 1;
            stats.total_cost += event.cost;
            *stats.event_type_counts.entry(event.kind()).or_insert(0) += 1;
            stats.oldest_event_time = Some(
                stats
                    .oldest_event_time
                    .map_or(event.timestamp, |t| t.min(event.timestamp)),
            );
            stats.newest_event_time = Some(
                stats
                    .newest_event_time
                    .map_or(event.timestamp, |t| t.max(event.timestamp)),
            );
        }
        stats
    }
}

/// Per-agent stats cache.
///
/// Every write bumps a store-wide epoch and drops the written agent's entry;
/// a computed entry is only cached if the epoch did not move while it was
/// being computed. Only agents with a live entry occupy memory.
#[derive(Default)]
struct StatsCache {
    epoch: u64,
    entries: HashMap<String, EventStats>,
}

impl StatsCache {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn invalidate(&mut self, agent_id: &str) {
        self.epoch = self.epoch.wrapping_add(1);
        self.entries.remove(agent_id);
    }

    fn get(&self, agent_id: &str) -> Option<EventStats> {
        self.entries.get(agent_id).cloned()
    }

    fn put(&mut self, agent_id: &str, epoch: u64, stats: EventStats) {
        // Agents without events are cheap to recompute; keep them out
        if self.epoch == epoch && stats.total_events > 0 {
            self.entries.insert(agent_id.to_string(), stats);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle to the event log
#[derive(Clone)]
pub struct EventStore {
    backend: Arc<dyn EventBackend>,
    limits: QueryLimits,
    stats_cache: Arc<RwLock<StatsCache>>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("backend", &self.backend.name())
            .field("limits", &self.limits)
            .finish()
    }
}

impl EventStore {
    pub fn new(backend: Arc<dyn EventBackend>, limits: QueryLimits) -> Self {
        Self {
            backend,
            limits,
            stats_cache: Arc::new(RwLock::new(StatsCache::default())),
        }
    }

    /// Store over a fresh [`InMemoryBackend`] with default limits
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), QueryLimits::default())
    }

    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    pub fn backend(&self) -> &Arc<dyn EventBackend> {
        &self.backend
    }

    /// Validate and persist an event, returning its new id.
    ///
    /// The event is visible to queries as soon as this returns.
    pub async fn append(&self, event: NewEvent) -> Result<EventId> {
        Ok(self.append_event(event).await?.id)
    }

    /// Like [`append`](Self::append) but returns the stored event
    pub async fn append_event(&self, event: NewEvent) -> Result<Event> {
        event.validate()?;

        let agent_id = event.agent_id.clone();
        let record = EventRecord::from_new(event, EventId::generate());
        let stored = self.backend.insert(record).await?;

        self.stats_cache.write().await.invalidate(&agent_id);

        info!(
            agent_id = %stored.agent_id,
            event_id = %stored.id,
            kind = %stored.kind(),
            timestamp = stored.timestamp,
            sequence = stored.sequence,
            "Appended event"
        );
        Ok(stored)
    }

    /// Point lookup
    pub async fn get_by_id(&self, id: &EventId) -> Result<Event> {
        self.backend
            .get_by_id(id)
            .await?
            .ok_or_else(|| RewindError::NotFound(format!("event {}", id)))
    }

    /// Query one agent's events
    pub async fn list_by_agent(&self, agent_id: &str, query: EventQuery) -> Result<Vec<Event>> {
        require_agent(agent_id)?;
        if let (Some(start), Some(end)) = (query.start_time, query.end_time)
            && start > end
        {
            return Err(RewindError::Validation(format!(
                "start_time ({}) is after end_time ({})",
                start, end
            )));
        }

        let limit = self.limits.resolve(query.limit)?;
        let index = IndexQuery {
            agent_id: agent_id.to_string(),
            start_time: query.start_time,
            end_time: query.end_time,
            kinds: (!query.kinds.is_empty()).then_some(query.kinds),
            order: query.order,
            limit: Some(limit),
        };

        let events = self.backend.query_by_index(&index).await?;
        debug!(agent_id, count = events.len(), limit, "Listed events");
        Ok(events)
    }

    /// All events at or after `start_time`, ascending
    pub async fn list_from(
        &self,
        agent_id: &str,
        start_time: TimestampMs,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        let query = EventQuery {
            start_time: Some(start_time),
            limit,
            ..EventQuery::default()
        };
        self.list_by_agent(agent_id, query).await
    }

    /// Events with `timestamp <= end_time`, ascending, at most `cap + 1` of them.
    ///
    /// Returning one more than `cap` lets the caller detect an oversized window
    /// without truncating silently. Not bounded by the query limits.
    pub async fn list_window(
        &self,
        agent_id: &str,
        end_time: TimestampMs,
        cap: usize,
    ) -> Result<Vec<Event>> {
        require_agent(agent_id)?;
        let index = IndexQuery {
            end_time: Some(end_time),
            limit: Some(cap.saturating_add(1)),
            ..IndexQuery::all(agent_id)
        };

        let events = self.backend.query_by_index(&index).await?;
        debug!(agent_id, end_time, count = events.len(), cap, "Loaded replay window");
        Ok(events)
    }

    /// Permanently delete an agent's events older than `older_than`.
    ///
    /// Returns the number of deleted events.
    pub async fn cleanup(&self, agent_id: &str, older_than: TimestampMs) -> Result<u64> {
        require_agent(agent_id)?;

        let predicate = DeletePredicate {
            agent_id: agent_id.to_string(),
            older_than,
        };
        let deleted = self.backend.delete_many(&predicate).await?;

        self.stats_cache.write().await.invalidate(agent_id);

        warn!(agent_id, older_than, deleted, "Deleted events during cleanup");
        Ok(deleted)
    }

    /// Aggregate counts and cost for an agent.
    ///
    /// An agent with no events yields zeroed stats.
    pub async fn stats(&self, agent_id: &str) -> Result<EventStats> {
        require_agent(agent_id)?;

        let epoch = {
            let cache = self.stats_cache.read().await;
            if let Some(stats) = cache.get(agent_id) {
                debug!(agent_id, "Stats cache hit");
                return Ok(stats);
            }
            cache.epoch()
        };

        let events = self
            .backend
            .query_by_index(&IndexQuery::all(agent_id))
            .await?;
        let stats = EventStats::from_events(agent_id, &events);

        self.stats_cache
            .write()
            .await
            .put(agent_id, epoch, stats.clone());
        Ok(stats)
    }
}

fn require_agent(agent_id: &str) -> Result<()> {
    if agent_id.trim().is_empty() {
        return Err(RewindError::Validation("agent_id is required".to_string()));
    }
    Ok(())
}
