//! Periodic idle-eviction sweep.
//!
//! Identities accumulate indefinitely in the quota maps and the session
//! registry without this: the sweep evicts everything idle longer than the
//! configured threshold, keeping memory bounded. Spawn it alongside the
//! request loop:
//!
//! ```ignore
//! tokio::spawn(run_idle_sweeper(gatekeeper, registry, Duration::from_secs(600)));
//! ```

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::quota::Gatekeeper;
use crate::session::SessionRegistry;

/// Run the idle-eviction sweep forever, once per `period`.
pub async fn run_idle_sweeper(
    gatekeeper: Arc<Gatekeeper>,
    registry: Arc<SessionRegistry>,
    period: Duration,
) {
    let threshold =
        ChronoDuration::seconds(gatekeeper.config().idle_eviction_threshold_secs as i64);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let quota_entries = gatekeeper.evict_idle().await;
        let conversations = registry.evict_idle(threshold).await;
        debug!(
            "Idle sweep removed {} quota entries, {} conversations",
            quota_entries, conversations
        );
    }
}
