//! # Rewind - time-travel debugging for AI agents
//!
//! Rewind keeps an append-only log of every action an agent takes and lets you
//! go back to any point in it:
//! - **Event Store**: durable, ordered, per-agent log of typed events
//! - **State Reducer**: pure fold of the log into a point-in-time snapshot
//! - **Replay Engine**: re-execute a recorded model call against another model
//! - **Comparator**: cost, token and text deltas between original and replay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rewind_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let rewind = Rewind::builder().build().await?;
//!
//!     // Record what the agent does
//!     let recorder = rewind.recorder("support_bot");
//!     recorder
//!         .record_llm_request(LlmRequestPayload::prompt("gpt-4o", "Summarize ticket #42"))
//!         .await?;
//!
//!     // Later: reconstruct the agent as of a point in time
//!     let result = rewind.replay("support_bot", now_ms(), None).await?;
//!     println!("{} events folded", result.state.event_count);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `store-surrealdb`: persist events in SurrealDB (`mem://`, `ws://`)

pub mod compare;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod pricing;
pub mod recorder;
pub mod reducer;
pub mod replay;
pub mod rewind;
pub mod store;
pub mod telemetry;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::compare::{
        ComparisonResult, DiffGranularity, DiffOp, DiffSpan, TextDiff, compare, compare_with,
    };
    pub use crate::config::{QueryLimits, ReplayConfig, RewindConfig, StoreConfig};
    pub use crate::error::{CostIncurred, ErrorKind, ReplayFailure, Result, RewindError};
    pub use crate::events::{
        AgentDecisionPayload, ErrorPayload, Event, EventId, EventKind, EventPayload,
        LlmRequestPayload, LlmResponsePayload, MemoryOpPayload, MemoryOperation, NamespacedKey,
        NewEvent, TimestampMs, ToolCallPayload, ToolName, now_ms,
    };
    pub use crate::llm::{
        Invocation, Message, MessageRole, ModelConfig, ModelInvoker, TokenUsage,
    };
    pub use crate::pricing::{ModelPrice, PricingTable};
    pub use crate::recorder::{EventRecorder, RecorderConfig, RecordingMode};
    pub use crate::reducer::{AgentState, reduce};
    pub use crate::replay::{
        ReplayEngine, ReplayOutcome, ReplayRequest, ReplayResult, ReplayStage, ResponseSnapshot,
    };
    pub use crate::rewind::{Rewind, RewindBuilder};
    pub use crate::store::{
        EventBackend, EventQuery, EventStats, EventStore, InMemoryBackend, SortOrder,
    };
    pub use tokio_util::sync::CancellationToken;
}
