//! Conversation Telemetry Sink
//!
//! External collaborator notified when conversations start and end. The
//! registry treats delivery as best-effort: payloads are dispatched after
//! its own bookkeeping completes and outside any held lock, failures are
//! logged and counted, and nothing here can affect a decision already
//! returned to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload announcing a freshly allocated conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStarted {
    /// Opaque conversation token
    pub conversation_id: String,
    /// Identity the conversation belongs to
    pub identity: String,
    /// Allocation instant
    pub started_at: DateTime<Utc>,
}

/// Payload describing a finalized conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Opaque conversation token
    pub conversation_id: String,
    /// Identity the conversation belonged to
    pub identity: String,
    /// Queries recorded over the conversation's lifetime
    pub total_queries: u32,
    /// Seconds between allocation and finalization
    pub duration_secs: u64,
    /// Why the conversation ended ("new_session", "ended", "idle_evicted", ...)
    pub reason: String,
}

/// External conversation-tracing collaborator.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// A new conversation was allocated.
    async fn conversation_started(&self, event: ConversationStarted) -> anyhow::Result<()>;

    /// A conversation was finalized.
    async fn conversation_ended(&self, summary: ConversationSummary) -> anyhow::Result<()>;
}
