//! SurrealDB event backend
//!
//! Events live in a schemaless `events` table indexed on
//! `(agent_id, timestamp, sequence)`. The payload is stored as its JSON
//! encoding so that every payload variant round-trips unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};
use tokio::sync::Mutex;
use tracing::info;

use super::backend::{DeletePredicate, EventBackend, EventRecord, IndexQuery, SortOrder};
use crate::error::{Result, RewindError};
use crate::events::{Event, EventId};

const SCHEMA: &str = "
    DEFINE TABLE IF NOT EXISTS events SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS events_order ON events FIELDS agent_id, timestamp, sequence;
    DEFINE INDEX IF NOT EXISTS events_event_id ON events FIELDS event_id UNIQUE;
";

const COLUMNS: &str = "event_id, sequence, agent_id, timestamp, kind, payload, cost";

/// Stored row shape
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventRow {
    event_id: String,
    sequence: u64,
    agent_id: String,
    timestamp: i64,
    kind: String,
    payload: String,
    cost: f64,
}

impl EventRow {
    fn from_event(event: &Event) -> Result<Self> {
        Ok(Self {
            event_id: event.id.to_string(),
            sequence: event.sequence,
            agent_id: event.agent_id.clone(),
            timestamp: event.timestamp,
            kind: event.kind().as_str().to_string(),
            payload: serde_json::to_string(&event.payload)?,
            cost: event.cost,
        })
    }

    fn into_event(self) -> Result<Event> {
        Ok(Event {
            id: EventId::from(self.event_id),
            sequence: self.sequence,
            agent_id: self.agent_id,
            timestamp: self.timestamp,
            payload: serde_json::from_str(&self.payload)?,
            cost: self.cost,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SequenceRow {
    sequence: u64,
}

fn unavailable(err: surrealdb::Error) -> RewindError {
    RewindError::StoreUnavailable(err.to_string())
}

/// Event backend persisting to SurrealDB
pub struct SurrealBackend {
    db: Surreal<Any>,
    /// Next sequence to assign; the lock also serializes inserts
    next_sequence: Mutex<u64>,
}

impl SurrealBackend {
    /// Connect to `url` (`mem://` or `ws://host:port`)
    /// and prepare the schema.
    pub async fn connect(url: &str, namespace: &str, database: &str) -> Result<Self> {
        let db = any::connect(url).await.map_err(unavailable)?;
        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(unavailable)?;

        db.query(SCHEMA)
            .await
            .map_err(unavailable)?
            .check()
            .map_err(unavailable)?;

        let mut response = db
            .query("SELECT sequence FROM events ORDER BY sequence DESC LIMIT 1")
            .await
            .map_err(unavailable)?;
        let last: Vec<SequenceRow> = response.take(0).map_err(unavailable)?;
        let next_sequence = last.first().map_or(0, |row| row.sequence + 1);

        info!(url, namespace, database, next_sequence, "Connected SurrealDB event store");

        Ok(Self {
            db,
            next_sequence: Mutex::new(next_sequence),
        })
    }

    async fn select(&self, sql: String, query: &IndexQuery) -> Result<Vec<Event>> {
        let mut request = self
            .db
            .query(sql)
            .bind(("agent_id", query.agent_id.clone()));
        if let Some(start) = query.start_time {
            request = request.bind(("start_time", start));
        }
        if let Some(end) = query.end_time {
            request = request.bind(("end_time", end));
        }
        if let Some(kinds) = &query.kinds {
            let kinds: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
            request = request.bind(("kinds", kinds));
        }

        let mut response = request.await.map_err(unavailable)?;
        let rows: Vec<EventRow> = response.take(0).map_err(unavailable)?;
        rows.into_iter().map(EventRow::into_event).collect()
    }
}

#[async_trait]
impl EventBackend for SurrealBackend {
    fn name(&self) -> &'static str {
        "surrealdb"
    }

    async fn insert(&self, record: EventRecord) -> Result<Event> {
        let mut next = self.next_sequence.lock().await;

        let event = record.with_sequence(*next);
        let row = EventRow::from_event(&event)?;

        self.db
            .query("CREATE events CONTENT $row RETURN NONE")
            .bind(("row", row))
            .await
            .map_err(unavailable)?
            .check()
            .map_err(unavailable)?;

        *next += 1;
        Ok(event)
    }

    async fn get_by_id(&self, id: &EventId) -> Result<Option<Event>> {
        let mut response = self
            .db
            .query(format!(
                "SELECT {COLUMNS} FROM events WHERE event_id = $event_id LIMIT 1"
            ))
            .bind(("event_id", id.to_string()))
            .await
            .map_err(unavailable)?;

        let rows: Vec<EventRow> = response.take(0).map_err(unavailable)?;
        rows.into_iter().next().map(EventRow::into_event).transpose()
    }

    async fn query_by_index(&self, query: &IndexQuery) -> Result<Vec<Event>> {
        let mut conditions = vec!["agent_id = $agent_id"];
        if query.start_time.is_some() {
            conditions.push("timestamp >= $start_time");
        }
        if query.end_time.is_some() {
            conditions.push("timestamp <= $end_time");
        }
        if query.kinds.is_some() {
            conditions.push("kind IN $kinds");
        }

        let direction = match query.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };

        let mut sql = format!(
            "SELECT {COLUMNS} FROM events WHERE {} ORDER BY timestamp {direction}, sequence {direction}",
            conditions.join(" AND ")
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        self.select(sql, query).await
    }

    async fn delete_many(&self, predicate: &DeletePredicate) -> Result<u64> {
        let mut response = self
            .db
            .query(
                "LET $gone = (DELETE events WHERE agent_id = $agent_id AND timestamp < $older_than RETURN BEFORE);
                 RETURN array::len($gone);",
            )
            .bind(("agent_id", predicate.agent_id.clone()))
            .bind(("older_than", predicate.older_than))
            .await
            .map_err(unavailable)?;

        let deleted: Option<u64> = response.take(1).map_err(unavailable)?;
        Ok(deleted.unwrap_or(0))
    }
}
