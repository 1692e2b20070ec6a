//! In-memory event backend

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::backend::{DeletePredicate, EventBackend, EventRecord, IndexQuery, SortOrder};
use crate::error::{Result, RewindError};
use crate::events::{Event, EventId};

#[derive(Default)]
struct Inner {
    /// Events per agent, kept sorted by `(timestamp, sequence)`
    by_agent: HashMap<String, Vec<Event>>,
    /// Owning agent per event id
    owners: HashMap<EventId, String>,
    next_sequence: u64,
}

/// Event backend holding everything in process memory.
///
/// Suitable for tests and single-process deployments where history does not
/// need to survive a restart.
#[derive(Default)]
pub struct InMemoryBackend {
    inner: RwLock<Inner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all agents
    pub async fn len(&self) -> usize {
        self.inner.read().await.owners.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: EventRecord) -> Result<Event> {
        let mut inner = self.inner.write().await;

        if inner.owners.contains_key(&record.id) {
            return Err(RewindError::Validation(format!(
                "duplicate event id {}",
                record.id
            )));
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let event = record.with_sequence(sequence);
        inner
            .owners
            .insert(event.id.clone(), event.agent_id.clone());

        let events = inner.by_agent.entry(event.agent_id.clone()).or_default();
        let key = event.order_key();
        let position = events.partition_point(|e| e.order_key() <= key);
        events.insert(position, event.clone());

        Ok(event)
    }

    async fn get_by_id(&self, id: &EventId) -> Result<Option<Event>> {
        let inner = self.inner.read().await;
        let Some(agent_id) = inner.owners.get(id) else {
            return Ok(None);
        };

        Ok(inner
            .by_agent
            .get(agent_id)
            .and_then(|events| events.iter().find(|e| &e.id == id))
            .cloned())
    }

    async fn query_by_index(&self, query: &IndexQuery) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        let Some(events) = inner.by_agent.get(&query.agent_id) else {
            return Ok(Vec::new());
        };

        // Narrow to the time window using the sort order, then filter by kind
        let lower = match query.start_time {
            Some(start) => events.partition_point(|e| e.timestamp < start),
            None => 0,
        };
        let upper = match query.end_time {
            Some(end) => events.partition_point(|e| e.timestamp <= end),
            None => events.len(),
        };
        if lower >= upper {
            return Ok(Vec::new());
        }

        let window = &events[lower..upper];
        let limit = query.limit.unwrap_or(usize::MAX);
        let matching = |e: &&Event| query.matches(e);

        let result = match query.order {
            SortOrder::Ascending => window.iter().filter(matching).take(limit).cloned().collect(),
            SortOrder::Descending => window
                .iter()
                .rev()
                .filter(matching)
                .take(limit)
                .cloned()
                .collect(),
        };

        Ok(result)
    }

    async fn delete_many(&self, predicate: &DeletePredicate) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let Some(events) = inner.by_agent.get_mut(&predicate.agent_id) else {
            return Ok(0);
        };

        // Sorted by timestamp, so the expired events form a prefix
        let cut = events.partition_point(|e| e.timestamp < predicate.older_than);
        let removed: Vec<Event> = events.drain(..cut).collect();
        if events.is_empty() {
            inner.by_agent.remove(&predicate.agent_id);
        }

        for event in &removed {
            inner.owners.remove(&event.id);
        }

        Ok(removed.len() as u64)
    }
}
