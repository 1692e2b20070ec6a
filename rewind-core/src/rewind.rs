//! Top-level handle tying the store, replay engine and comparator together

use std::sync::Arc;
use tracing::info;

use crate::compare::{ComparisonResult, compare};
use crate::config::{RewindConfig, StoreConfig};
use crate::error::Result;
use crate::events::{Event, EventId, NewEvent, TimestampMs};
use crate::llm::{ModelConfig, ModelInvoker, StubModelInvoker};
use crate::pricing::PricingTable;
use crate::recorder::{EventRecorder, RecorderConfig};
use crate::replay::{ReplayEngine, ReplayRequest, ReplayResult, ResponseSnapshot};
use crate::store::{EventBackend, EventQuery, EventStats, EventStore, InMemoryBackend};

/// Entry point for callers (dashboards, CLIs, agent runtimes).
///
/// Cheap to clone; every clone shares the same store.
#[derive(Clone, Debug)]
pub struct Rewind {
    store: EventStore,
    engine: ReplayEngine,
    pricing: Arc<PricingTable>,
}

impl Rewind {
    pub fn builder() -> RewindBuilder {
        RewindBuilder::new()
    }

    /// Build from configuration, opening the configured backend
    pub async fn from_config(config: RewindConfig, invoker: Arc<dyn ModelInvoker>) -> Result<Self> {
        RewindBuilder::new()
            .config(config)
            .invoker(invoker)
            .build()
            .await
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn engine(&self) -> &ReplayEngine {
        &self.engine
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub async fn append_event(&self, event: NewEvent) -> Result<EventId> {
        self.store.append(event).await
    }

    pub async fn list_events(&self, agent_id: &str, query: EventQuery) -> Result<Vec<Event>> {
        self.store.list_by_agent(agent_id, query).await
    }

    pub async fn get_event(&self, id: &EventId) -> Result<Event> {
        self.store.get_by_id(id).await
    }

    pub async fn get_event_stats(&self, agent_id: &str) -> Result<EventStats> {
        self.store.stats(agent_id).await
    }

    /// Replay an agent at `target_timestamp`, re-executing under `alternate` if given
    pub async fn replay(
        &self,
        agent_id: &str,
        target_timestamp: TimestampMs,
        alternate: Option<ModelConfig>,
    ) -> Result<ReplayResult> {
        let mut request = ReplayRequest::new(agent_id, target_timestamp);
        request.alternate = alternate;
        self.engine.replay(request).await
    }

    /// Replay with full control over timeout and cancellation
    pub async fn replay_with(&self, request: ReplayRequest) -> Result<ReplayResult> {
        self.engine.replay(request).await
    }

    pub async fn replay_many(&self, requests: Vec<ReplayRequest>) -> Vec<Result<ReplayResult>> {
        self.engine.replay_many(requests, None).await
    }

    pub fn compare(
        &self,
        original: &ResponseSnapshot,
        replayed: &ResponseSnapshot,
    ) -> ComparisonResult {
        compare(original, replayed)
    }

    /// Permanently delete an agent's events older than `older_than`
    pub async fn cleanup_events(&self, agent_id: &str, older_than: TimestampMs) -> Result<u64> {
        self.store.cleanup(agent_id, older_than).await
    }

    /// Recorder for one agent, pricing responses with this instance's table
    pub fn recorder(&self, agent_id: impl Into<String>) -> EventRecorder {
        EventRecorder::new(self.store.clone(), agent_id).with_pricing(self.pricing.clone())
    }

    /// Recorder with custom recording mode and redaction
    pub fn recorder_with(
        &self,
        agent_id: impl Into<String>,
        config: &RecorderConfig,
    ) -> Result<EventRecorder> {
        Ok(EventRecorder::with_config(self.store.clone(), agent_id, config)?
            .with_pricing(self.pricing.clone()))
    }
}

/// Builder for [`Rewind`]
#[derive(Default)]
pub struct RewindBuilder {
    config: Option<RewindConfig>,
    backend: Option<Arc<dyn EventBackend>>,
    invoker: Option<Arc<dyn ModelInvoker>>,
    pricing: Option<PricingTable>,
}

impl RewindBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RewindConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this backend instead of the configured one
    pub fn backend(mut self, backend: Arc<dyn EventBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Model invoker for re-execution; without one, re-executions fail
    pub fn invoker(mut self, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Use this table instead of the built-in one plus configured overrides
    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub async fn build(self) -> Result<Rewind> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => open_backend(&config.store).await?,
        };
        let invoker = self
            .invoker
            .unwrap_or_else(|| Arc::new(StubModelInvoker) as Arc<dyn ModelInvoker>);
        let pricing = self
            .pricing
            .unwrap_or_else(|| PricingTable::with_overrides(&config.pricing));

        info!(backend = backend.name(), "Initialized event store");

        let store = EventStore::new(backend, config.query);
        let engine = ReplayEngine::new(store.clone(), invoker, pricing.clone(), config.replay);

        Ok(Rewind {
            store,
            engine,
            pricing: Arc::new(pricing),
        })
    }
}

async fn open_backend(config: &StoreConfig) -> Result<Arc<dyn EventBackend>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(InMemoryBackend::new())),
        #[cfg(feature = "store-surrealdb")]
        StoreConfig::SurrealDb {
            url,
            namespace,
            database,
        } => {
            let backend = crate::store::SurrealBackend::connect(url, namespace, database).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "store-surrealdb"))]
        StoreConfig::SurrealDb { .. } => Err(crate::error::RewindError::Configuration(
            "surrealdb store requires the `store-surrealdb` feature".to_string(),
        )),
    }
}
