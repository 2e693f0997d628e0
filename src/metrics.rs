// Prometheus metrics for admission-control monitoring
//
// Exposed on the /metrics HTTP endpoint:
// - Admission decisions by outcome and tier (counter)
// - Live conversation records (gauge)
// - Tracked per-identity quota entries (gauge)
// - Idle evictions, counter corruptions, sink failures (counters)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Decision metrics
    pub static ref ADMISSION_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "admission_decisions_total",
            "Total admission decisions by outcome and failing tier"
        ),
        &["outcome", "tier"]
    ).expect("Failed to create admission decisions metric");

    pub static ref COUNTER_CORRUPTIONS_TOTAL: IntCounter = IntCounter::new(
        "counter_corruptions_total",
        "Counter invariant violations observed (requests denied fail-closed)"
    ).expect("Failed to create counter corruptions metric");

    // Registry metrics
    pub static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new(
        "active_sessions",
        "Live conversation records in the session registry"
    ).expect("Failed to create active sessions metric");

    pub static ref TRACKED_IDENTITIES: IntGauge = IntGauge::new(
        "tracked_identities",
        "Per-identity quota entries currently held across all tiers"
    ).expect("Failed to create tracked identities metric");

    pub static ref IDLE_EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        "idle_evictions_total",
        "Quota entries and conversation records evicted after idling"
    ).expect("Failed to create idle evictions metric");

    // Sink metrics
    pub static ref SINK_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "sink_failures_total",
        "Conversation sink deliveries that failed (logged and ignored)"
    ).expect("Failed to create sink failures metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSION_DECISIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COUNTER_CORRUPTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone()))?;
    REGISTRY.register(Box::new(TRACKED_IDENTITIES.clone()))?;
    REGISTRY.register(Box::new(IDLE_EVICTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SINK_FAILURES_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
