//! Anonymous Trial Tracker
//!
//! A one-shot allowance for callers that have not authenticated. Unlike the
//! window counters this is not time-windowed: once an anonymous identity has
//! spent its trial queries the only way forward is to log in, at which point
//! evaluation switches to the authenticated daily tier and this tracker is
//! no longer consulted.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::error::GatekeeperError;

/// Outcome of a single `try_consume`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialOutcome {
    /// Whether a trial query was granted
    pub accepted: bool,
    /// Trial queries left for this identity
    pub remaining: u32,
}

#[derive(Debug)]
struct TrialState {
    used: u32,
    last_touched: DateTime<Utc>,
}

#[derive(Debug)]
struct TrialCell {
    state: Mutex<TrialState>,
}

/// Per-identity one-shot trial counters.
///
/// The outer map is only held long enough to find or insert an entry; each
/// entry carries its own lock, so unrelated identities never contend.
#[derive(Debug)]
pub struct TrialTracker {
    cap: u32,
    entries: RwLock<HashMap<String, Arc<TrialCell>>>,
}

impl TrialTracker {
    /// Create a tracker. A zero cap is a configuration error.
    pub fn new(cap: u32) -> Result<Self, GatekeeperError> {
        if cap == 0 {
            return Err(GatekeeperError::InvalidConfig {
                field: "anonymous_trial_cap",
                value: cap.to_string(),
            });
        }
        Ok(Self {
            cap,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Trial allowance per identity
    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Consume one trial query for `identity`.
    ///
    /// Exhaustion is permanent: there is no window to wait out.
    pub async fn try_consume(&self, identity: &str, now: DateTime<Utc>) -> TrialOutcome {
        let cell = self.cell(identity, now).await;
        let mut state = cell.state.lock().unwrap();
        state.last_touched = now;

        if state.used >= self.cap {
            return TrialOutcome {
                accepted: false,
                remaining: 0,
            };
        }

        state.used += 1;
        TrialOutcome {
            accepted: true,
            remaining: self.cap - state.used,
        }
    }

    /// Trial queries left for `identity` without consuming one.
    pub async fn remaining(&self, identity: &str) -> u32 {
        let entries = self.entries.read().await;
        match entries.get(identity) {
            Some(cell) => {
                let state = cell.state.lock().unwrap();
                self.cap.saturating_sub(state.used)
            }
            None => self.cap,
        }
    }

    /// Number of identities currently tracked
    pub async fn tracked(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drop entries idle longer than `threshold`; returns how many were removed.
    pub async fn evict_idle(&self, threshold: Duration, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cell| {
            let state = cell.state.lock().unwrap();
            now - state.last_touched < threshold
        });
        before - entries.len()
    }

    async fn cell(&self, identity: &str, now: DateTime<Utc>) -> Arc<TrialCell> {
        {
            let entries = self.entries.read().await;
            if let Some(cell) = entries.get(identity) {
                return Arc::clone(cell);
            }
        }

        let mut entries = self.entries.write().await;
        let cell = entries
            .entry(identity.to_string())
            .or_insert_with(|| {
                Arc::new(TrialCell {
                    state: Mutex::new(TrialState {
                        used: 0,
                        last_touched: now,
                    }),
                })
            });
        Arc::clone(cell)
    }
}
