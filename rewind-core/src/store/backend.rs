//! Storage backend abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::{Event, EventId, EventKind, EventPayload, NewEvent, TimestampMs};

/// An event ready to persist: identity assigned, sequence not yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub agent_id: String,
    pub timestamp: TimestampMs,
    pub payload: EventPayload,
    pub cost: f64,
}

impl EventRecord {
    /// Build a record from a validated [`NewEvent`]
    pub(crate) fn from_new(new: NewEvent, id: EventId) -> Self {
        Self {
            id,
            agent_id: new.agent_id,
            timestamp: new.timestamp.unwrap_or_default(),
            payload: new.payload,
            cost: new.cost.unwrap_or(0.0),
        }
    }

    /// Attach the append sequence
    pub fn with_sequence(self, sequence: u64) -> Event {
        Event {
            id: self.id,
            sequence,
            agent_id: self.agent_id,
            timestamp: self.timestamp,
            payload: self.payload,
            cost: self.cost,
        }
    }
}

/// Sort order for range queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first (timestamp, then append sequence)
    #[default]
    Ascending,
    /// Newest first; the exact reverse of ascending
    Descending,
}

/// Index query against one agent's events.
///
/// Time bounds are inclusive. `kinds: None` matches every kind.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub agent_id: String,
    pub start_time: Option<TimestampMs>,
    pub end_time: Option<TimestampMs>,
    pub kinds: Option<Vec<EventKind>>,
    pub order: SortOrder,
    /// `None` returns every matching event
    pub limit: Option<usize>,
}

impl IndexQuery {
    /// Every event of an agent, ascending
    pub fn all(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            start_time: None,
            end_time: None,
            kinds: None,
            order: SortOrder::Ascending,
            limit: None,
        }
    }

    /// Whether `event` satisfies the filters (ignores order and limit)
    pub fn matches(&self, event: &Event) -> bool {
        event.agent_id == self.agent_id
            && self.start_time.is_none_or(|start| event.timestamp >= start)
            && self.end_time.is_none_or(|end| event.timestamp <= end)
            && self
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&event.kind()))
    }
}

/// Retention predicate. Always scoped to one agent and a cutoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePredicate {
    pub agent_id: String,
    /// Events with `timestamp < older_than` are deleted
    pub older_than: TimestampMs,
}

/// Trait for event persistence backends.
///
/// Backends own the append sequence: `insert` must assign a sequence strictly
/// greater than any previously assigned one, so that events sharing a
/// timestamp keep their append order.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Persist a record and return it with its assigned sequence
    async fn insert(&self, record: EventRecord) -> Result<Event>;

    /// Point lookup by id
    async fn get_by_id(&self, id: &EventId) -> Result<Option<Event>>;

    /// Range query ordered by `(timestamp, sequence)`
    async fn query_by_index(&self, query: &IndexQuery) -> Result<Vec<Event>>;

    /// Delete matching events, returning how many were removed
    async fn delete_many(&self, predicate: &DeletePredicate) -> Result<u64>;
}
