//! Per-identity counter store
//!
//! Lazily creates one [`WindowCounter`] per identity for a single tier.
//! The map lock is held only to find or insert an entry; every counter owns
//! its own lock, so admission checks for unrelated identities never contend.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::GatekeeperError;
use crate::quota::window::{WindowCounter, WindowKind};

/// One quota tier's counters, keyed by identity.
#[derive(Debug)]
pub struct IdentityWindows {
    cap: u32,
    kind: WindowKind,
    tier: &'static str,
    counters: RwLock<HashMap<String, Arc<WindowCounter>>>,
}

impl IdentityWindows {
    /// Create a store. A zero cap is a configuration error.
    pub fn new(cap: u32, kind: WindowKind, tier: &'static str) -> Result<Self, GatekeeperError> {
        if cap == 0 {
            return Err(GatekeeperError::InvalidConfig {
                field: tier,
                value: cap.to_string(),
            });
        }
        Ok(Self {
            cap,
            kind,
            tier,
            counters: RwLock::new(HashMap::new()),
        })
    }

    /// Get the counter for `identity`, creating it on first reference.
    pub async fn counter(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<WindowCounter>, GatekeeperError> {
        {
            let counters = self.counters.read().await;
            if let Some(counter) = counters.get(identity) {
                return Ok(Arc::clone(counter));
            }
        }

        let mut counters = self.counters.write().await;
        if let Some(counter) = counters.get(identity) {
            return Ok(Arc::clone(counter));
        }
        let counter = Arc::new(WindowCounter::new(self.cap, self.kind, self.tier, now)?);
        counters.insert(identity.to_string(), Arc::clone(&counter));
        Ok(counter)
    }

    /// Number of identities currently tracked
    pub async fn tracked(&self) -> usize {
        self.counters.read().await.len()
    }

    /// Drop counters idle longer than `threshold`; returns how many were removed.
    pub async fn evict_idle(&self, threshold: Duration, now: DateTime<Utc>) -> usize {
        let mut counters = self.counters.write().await;
        let before = counters.len();
        counters.retain(|_, counter| counter.idle_for(now) < threshold);
        before - counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_cap_rejected() {
        assert!(IdentityWindows::new(0, WindowKind::PerMinute, "per_minute").is_err());
    }

    #[tokio::test]
    async fn test_counter_created_on_first_reference() {
        let store = IdentityWindows::new(10, WindowKind::PerHour, "per_hour").unwrap();
        assert_eq!(store.tracked().await, 0);

        let now = Utc::now();
        store.counter("user-1", now).await.unwrap();
        assert_eq!(store.tracked().await, 1);
    }

    #[tokio::test]
    async fn test_same_identity_gets_same_counter() {
        let store = IdentityWindows::new(10, WindowKind::PerHour, "per_hour").unwrap();
        let now = Utc::now();

        let counter = store.counter("user-1", now).await.unwrap();
        counter.try_increment(now).unwrap();

        let again = store.counter("user-1", now).await.unwrap();
        assert_eq!(again.remaining(now), 9);
    }

    #[tokio::test]
    async fn test_identities_do_not_share_counters() {
        let store = IdentityWindows::new(1, WindowKind::PerMinute, "per_minute").unwrap();
        let now = Utc::now();

        let first = store.counter("user-1", now).await.unwrap();
        assert!(first.try_increment(now).unwrap().accepted);
        assert!(!first.try_increment(now).unwrap().accepted);

        let second = store.counter("user-2", now).await.unwrap();
        assert!(second.try_increment(now).unwrap().accepted);
    }

    #[tokio::test]
    async fn test_evict_idle_counters() {
        let store = IdentityWindows::new(10, WindowKind::PerHour, "per_hour").unwrap();
        let now = Utc::now();

        let counter = store.counter("user-1", now).await.unwrap();
        counter.try_increment(now).unwrap();
        store
            .counter("user-2", now + Duration::hours(20))
            .await
            .unwrap();

        let evicted = store
            .evict_idle(Duration::days(1), now + Duration::hours(30))
            .await;
        assert_eq!(evicted, 1);
        assert_eq!(store.tracked().await, 1);
    }
}
