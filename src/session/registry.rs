//! Session Registry
//!
//! Maps each identity to its single live conversation record. Records are
//! reused across queries, replaced wholesale on a forced renewal, and
//! removed on an explicit end; every finalization hands a summary to the
//! conversation sink, fire-and-forget.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::metrics;
use crate::session::sink::{ConversationSink, ConversationStarted, ConversationSummary};

/// A live conversation record.
///
/// `conversation_id` is immutable for the life of the record; a new id
/// means a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    /// Identity the conversation belongs to
    pub identity: String,
    /// Opaque conversation token
    pub conversation_id: String,
    /// Allocation instant
    pub created_at: DateTime<Utc>,
    /// Queries recorded so far
    pub query_count: u32,
    /// Instant of the most recent query
    pub last_activity_at: DateTime<Utc>,
}

/// Identity → conversation record map with per-entry locking.
pub struct SessionRegistry {
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn ConversationSink>>,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionRecord>>>>,
}

impl SessionRegistry {
    /// Registry without a telemetry sink.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sink: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registry that reports conversation lifecycle to `sink`.
    pub fn with_sink(clock: Arc<dyn Clock>, sink: Arc<dyn ConversationSink>) -> Self {
        Self {
            clock,
            sink: Some(sink),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the identity's live record, allocating one if none exists.
    pub async fn get_or_create(&self, identity: &str) -> SessionRecord {
        let now = self.clock.now();
        let (cell, created) = self.cell(identity, now).await;

        if let Some(record) = created {
            self.announce_created(&record);
            return record;
        }

        let record = cell.lock().unwrap().clone();
        debug!(
            "Reusing conversation '{}' for '{}'",
            record.conversation_id, identity
        );
        record
    }

    /// Replace the identity's record with a fresh conversation.
    ///
    /// Any existing record is finalized with reason "new_session" and its
    /// summary handed to the sink. The new conversation id is guaranteed
    /// distinct from the previous one.
    pub async fn force_new(&self, identity: &str) -> SessionRecord {
        let now = self.clock.now();

        let (previous, record) = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions
                .remove(identity)
                .map(|cell| cell.lock().unwrap().clone());

            let mut conversation_id = Self::new_conversation_id();
            if let Some(prev) = &previous {
                while conversation_id == prev.conversation_id {
                    conversation_id = Self::new_conversation_id();
                }
            }

            let record = SessionRecord {
                identity: identity.to_string(),
                conversation_id,
                created_at: now,
                query_count: 0,
                last_activity_at: now,
            };
            sessions.insert(identity.to_string(), Arc::new(Mutex::new(record.clone())));
            (previous, record)
        };

        match previous {
            Some(prev) => {
                self.notify_ended(Self::summarize(prev, now, "new_session"));
            }
            None => metrics::ACTIVE_SESSIONS.inc(),
        }

        info!(
            "New conversation '{}' for '{}'",
            record.conversation_id, identity
        );
        self.notify_started(&record);
        record
    }

    /// Finalize and remove the identity's record.
    ///
    /// Returns the summary handed to the sink, or `None` if no record
    /// existed. A subsequent `get_or_create` starts fresh.
    pub async fn end(&self, identity: &str, reason: &str) -> Option<ConversationSummary> {
        let now = self.clock.now();
        let cell = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(identity)?
        };

        let record = cell.lock().unwrap().clone();
        let summary = Self::summarize(record, now, reason);
        metrics::ACTIVE_SESSIONS.dec();
        info!(
            "Conversation '{}' ended for '{}' ({} queries, reason: {})",
            summary.conversation_id, identity, summary.total_queries, reason
        );
        self.notify_ended(summary.clone());
        Some(summary)
    }

    /// Count one query against the identity's record, creating the record
    /// on demand so the call is idempotent with `get_or_create`.
    pub async fn record_query(&self, identity: &str) {
        let now = self.clock.now();
        let (cell, created) = self.cell(identity, now).await;
        if let Some(record) = created {
            self.announce_created(&record);
        }

        let mut record = cell.lock().unwrap();
        record.query_count += 1;
        record.last_activity_at = now;
    }

    /// Queries recorded in the identity's current conversation.
    pub async fn query_count(&self, identity: &str) -> u32 {
        let sessions = self.sessions.read().await;
        sessions
            .get(identity)
            .map_or(0, |cell| cell.lock().unwrap().query_count)
    }

    /// The identity's current conversation id, if any.
    pub async fn conversation_id(&self, identity: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions
            .get(identity)
            .map(|cell| cell.lock().unwrap().conversation_id.clone())
    }

    /// Number of live conversation records.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Finalize and remove records idle longer than `threshold`.
    ///
    /// Each evicted conversation is reported to the sink with reason
    /// "idle_evicted". Returns the number of records removed.
    pub async fn evict_idle(&self, threshold: Duration) -> usize {
        let now = self.clock.now();
        let mut ended = Vec::new();

        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|_, cell| {
                let record = cell.lock().unwrap();
                if now - record.last_activity_at < threshold {
                    true
                } else {
                    ended.push(record.clone());
                    false
                }
            });
        }

        let evicted = ended.len();
        for record in ended {
            metrics::ACTIVE_SESSIONS.dec();
            self.notify_ended(Self::summarize(record, now, "idle_evicted"));
        }
        if evicted > 0 {
            info!("Evicted {} idle conversations", evicted);
            metrics::IDLE_EVICTIONS_TOTAL.inc_by(evicted as u64);
        }
        evicted
    }

    fn new_conversation_id() -> String {
        format!("conv_{}", &Uuid::new_v4().simple().to_string()[..12])
    }

    async fn cell(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> (Arc<Mutex<SessionRecord>>, Option<SessionRecord>) {
        {
            let sessions = self.sessions.read().await;
            if let Some(cell) = sessions.get(identity) {
                return (Arc::clone(cell), None);
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(cell) = sessions.get(identity) {
            return (Arc::clone(cell), None);
        }

        let record = SessionRecord {
            identity: identity.to_string(),
            conversation_id: Self::new_conversation_id(),
            created_at: now,
            query_count: 0,
            last_activity_at: now,
        };
        let cell = Arc::new(Mutex::new(record.clone()));
        sessions.insert(identity.to_string(), Arc::clone(&cell));
        (cell, Some(record))
    }

    fn announce_created(&self, record: &SessionRecord) {
        metrics::ACTIVE_SESSIONS.inc();
        info!(
            "Created conversation '{}' for '{}'",
            record.conversation_id, record.identity
        );
        self.notify_started(record);
    }

    fn summarize(record: SessionRecord, now: DateTime<Utc>, reason: &str) -> ConversationSummary {
        ConversationSummary {
            conversation_id: record.conversation_id,
            identity: record.identity,
            total_queries: record.query_count,
            duration_secs: (now - record.created_at).num_seconds().max(0) as u64,
            reason: reason.to_string(),
        }
    }

    fn notify_started(&self, record: &SessionRecord) {
        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let event = ConversationStarted {
                conversation_id: record.conversation_id.clone(),
                identity: record.identity.clone(),
                started_at: record.created_at,
            };
            tokio::spawn(async move {
                if let Err(err) = sink.conversation_started(event).await {
                    metrics::SINK_FAILURES_TOTAL.inc();
                    warn!("Conversation sink rejected start event: {}", err);
                }
            });
        }
    }

    fn notify_ended(&self, summary: ConversationSummary) {
        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            tokio::spawn(async move {
                if let Err(err) = sink.conversation_ended(summary).await {
                    metrics::SINK_FAILURES_TOTAL.inc();
                    warn!("Conversation sink rejected summary: {}", err);
                }
            });
        }
    }
}
