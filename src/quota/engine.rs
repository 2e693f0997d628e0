//! Quota Policy Engine
//!
//! Composes the shared daily budget, the per-identity burst and sustained
//! windows, and the tier matching the caller's authentication state into a
//! single ordered evaluation. The first tier to reject short-circuits the
//! rest and names itself in the decision.
//!
//! Because every tier's counter is independently locked, a request that
//! passes early tiers but fails a later one would otherwise leave quota
//! spent for a rejected request. The engine therefore increments
//! defensively and rolls back every already-committed tier the moment a
//! later tier rejects: quota is never spent on a rejection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::GatekeeperConfig;
use crate::error::GatekeeperError;
use crate::metrics;
use crate::quota::store::IdentityWindows;
use crate::quota::trial::TrialTracker;
use crate::quota::window::{WindowCounter, WindowKind, WindowUsage};

/// Budget fractions at which a usage warning is logged, once per window
const BUDGET_WARNING_THRESHOLDS: [f64; 4] = [0.5, 0.8, 0.9, 0.95];

/// One layer of the quota hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitTier {
    /// Daily budget shared by all identities
    Global,
    /// Per-identity requests per minute
    PerMinute,
    /// Per-identity requests per hour
    PerHour,
    /// Per-identity daily allowance (authenticated callers)
    Daily,
    /// One-shot trial allowance (anonymous callers)
    Trial,
}

impl LimitTier {
    /// Stable name used in decisions, logs, and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitTier::Global => "global",
            LimitTier::PerMinute => "per_minute",
            LimitTier::PerHour => "per_hour",
            LimitTier::Daily => "daily",
            LimitTier::Trial => "trial",
        }
    }
}

impl fmt::Display for LimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's pass/fail output for a single evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// First tier that rejected, when denied
    pub limit: Option<LimitTier>,

    /// Tightest remaining capacity across the evaluated tiers
    pub remaining: u32,

    /// Seconds until the failing window resets (absent for the trial tier)
    pub retry_after_secs: Option<u64>,

    /// The caller must authenticate to proceed (trial exhausted)
    pub requires_auth: bool,
}

impl PolicyDecision {
    /// An allowed decision with the given remaining capacity
    pub fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            limit: None,
            remaining,
            retry_after_secs: None,
            requires_auth: false,
        }
    }

    /// A denial at a windowed tier
    fn denied(limit: LimitTier, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            limit: Some(limit),
            remaining: 0,
            retry_after_secs: Some(retry_after_secs),
            requires_auth: false,
        }
    }

    /// A denial because the anonymous trial is spent: waiting will not help
    fn trial_exhausted() -> Self {
        Self {
            allowed: false,
            limit: Some(LimitTier::Trial),
            remaining: 0,
            retry_after_secs: None,
            requires_auth: true,
        }
    }

    /// Fail-closed denial after an internal-state violation
    fn fail_closed() -> Self {
        Self {
            allowed: false,
            limit: None,
            remaining: 0,
            retry_after_secs: None,
            requires_auth: false,
        }
    }
}

/// Admission-control engine: one instance owns every counter.
///
/// Constructed once at startup and shared by reference; there is no global
/// state behind it.
pub struct Gatekeeper {
    clock: Arc<dyn Clock>,
    global: Arc<WindowCounter>,
    per_minute: IdentityWindows,
    per_hour: IdentityWindows,
    auth_daily: IdentityWindows,
    trial: TrialTracker,
    config: GatekeeperConfig,
}

impl Gatekeeper {
    /// Create an engine from a validated configuration.
    pub fn new(config: GatekeeperConfig, clock: Arc<dyn Clock>) -> Result<Self, GatekeeperError> {
        config.validate()?;
        let now = clock.now();
        info!(
            "Gatekeeper initialized: {} calls/day global, {} trial queries",
            config.daily_global_cap, config.anonymous_trial_cap
        );
        Ok(Self {
            global: Arc::new(WindowCounter::new(
                config.daily_global_cap,
                WindowKind::PerDay,
                LimitTier::Global.as_str(),
                now,
            )?),
            per_minute: IdentityWindows::new(
                config.per_minute_cap,
                WindowKind::PerMinute,
                LimitTier::PerMinute.as_str(),
            )?,
            per_hour: IdentityWindows::new(
                config.per_hour_cap,
                WindowKind::PerHour,
                LimitTier::PerHour.as_str(),
            )?,
            auth_daily: IdentityWindows::new(
                config.authenticated_daily_cap,
                WindowKind::PerDay,
                LimitTier::Daily.as_str(),
            )?,
            trial: TrialTracker::new(config.anonymous_trial_cap)?,
            clock,
            config,
        })
    }

    /// Current configuration
    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    /// Decide whether a request from `identity` may proceed.
    pub async fn evaluate(&self, identity: &str, authenticated: bool) -> PolicyDecision {
        let now = self.clock.now();
        self.evaluate_at(identity, authenticated, now).await
    }

    /// `evaluate` with an explicit instant, for deterministic tests.
    pub async fn evaluate_at(
        &self,
        identity: &str,
        authenticated: bool,
        now: DateTime<Utc>,
    ) -> PolicyDecision {
        if !self.config.enabled {
            return PolicyDecision::allowed(u32::MAX);
        }

        let decision = match self.admit(identity, authenticated, now).await {
            Ok(decision) => decision,
            Err(err) => {
                error!("Admission state corrupted, failing closed: {}", err);
                metrics::COUNTER_CORRUPTIONS_TOTAL.inc();
                PolicyDecision::fail_closed()
            }
        };

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        let tier = decision.limit.map_or("none", |t| t.as_str());
        metrics::ADMISSION_DECISIONS_TOTAL
            .with_label_values(&[outcome, tier])
            .inc();

        if !decision.allowed {
            debug!("Request from '{}' denied at tier '{}'", identity, tier);
        }

        decision
    }

    /// Ordered, two-phase admission across all tiers.
    ///
    /// Counters are incremented in the fixed order {global, per-minute,
    /// per-hour, tier-daily/trial}; one lock is held at a time. On the
    /// first rejection every previously committed increment is rolled back.
    async fn admit(
        &self,
        identity: &str,
        authenticated: bool,
        now: DateTime<Utc>,
    ) -> Result<PolicyDecision, GatekeeperError> {
        let mut tiers: Vec<(LimitTier, Arc<WindowCounter>)> = Vec::with_capacity(4);
        tiers.push((LimitTier::Global, Arc::clone(&self.global)));
        tiers.push((LimitTier::PerMinute, self.per_minute.counter(identity, now).await?));
        tiers.push((LimitTier::PerHour, self.per_hour.counter(identity, now).await?));
        if authenticated {
            tiers.push((LimitTier::Daily, self.auth_daily.counter(identity, now).await?));
        }

        let mut committed: Vec<Arc<WindowCounter>> = Vec::with_capacity(tiers.len());
        let mut tightest = u32::MAX;

        for (tier, counter) in tiers {
            let admission = match counter.try_increment(now) {
                Ok(admission) => admission,
                Err(err) => {
                    Self::rollback_committed(&committed, now);
                    return Err(err);
                }
            };

            if !admission.accepted {
                Self::rollback_committed(&committed, now);
                return Ok(PolicyDecision::denied(tier, counter.retry_after_secs(now)));
            }

            if tier == LimitTier::Global {
                self.warn_on_budget_threshold(self.config.daily_global_cap - admission.remaining);
            }
            tightest = tightest.min(admission.remaining);
            committed.push(counter);
        }

        if !authenticated {
            let outcome = self.trial.try_consume(identity, now).await;
            if !outcome.accepted {
                Self::rollback_committed(&committed, now);
                return Ok(PolicyDecision::trial_exhausted());
            }
            tightest = tightest.min(outcome.remaining);
        }

        Ok(PolicyDecision::allowed(tightest))
    }

    fn rollback_committed(committed: &[Arc<WindowCounter>], now: DateTime<Utc>) {
        for counter in committed {
            counter.rollback(now);
        }
    }

    /// Log a warning when the global count lands exactly on a threshold.
    /// The count hits each value once per window, so each warning fires
    /// once per window.
    fn warn_on_budget_threshold(&self, count: u32) {
        let cap = self.config.daily_global_cap;
        for threshold in BUDGET_WARNING_THRESHOLDS {
            if count == (cap as f64 * threshold).ceil() as u32 {
                warn!(
                    "{}% of the daily budget used ({}/{})",
                    (threshold * 100.0) as u32,
                    count,
                    cap
                );
            }
        }
    }

    /// Usage snapshot of the shared daily budget
    pub fn global_status(&self) -> WindowUsage {
        self.global.snapshot(self.clock.now())
    }

    /// Whether the shared daily budget is currently spent
    pub fn is_rate_limited(&self) -> bool {
        self.global.remaining(self.clock.now()) == 0
    }

    /// Trial queries left for an anonymous identity, without consuming one
    pub async fn trial_remaining(&self, identity: &str) -> u32 {
        self.trial.remaining(identity).await
    }

    /// Per-identity entries currently tracked across all tiers
    pub async fn tracked_entries(&self) -> usize {
        self.per_minute.tracked().await
            + self.per_hour.tracked().await
            + self.auth_daily.tracked().await
            + self.trial.tracked().await
    }

    /// Evict per-identity state idle longer than the configured threshold.
    ///
    /// Returns the number of entries removed.
    pub async fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let threshold = Duration::seconds(self.config.idle_eviction_threshold_secs as i64);

        let evicted = self.per_minute.evict_idle(threshold, now).await
            + self.per_hour.evict_idle(threshold, now).await
            + self.auth_daily.evict_idle(threshold, now).await
            + self.trial.evict_idle(threshold, now).await;

        if evicted > 0 {
            info!("Evicted {} idle quota entries", evicted);
            metrics::IDLE_EVICTIONS_TOTAL.inc_by(evicted as u64);
        }
        metrics::TRACKED_IDENTITIES.set(self.tracked_entries().await as i64);

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 9, 30, 0).unwrap()
    }

    fn engine(config: GatekeeperConfig) -> (Gatekeeper, ManualClock) {
        let clock = ManualClock::new(start());
        let gatekeeper = Gatekeeper::new(config, Arc::new(clock.clone())).unwrap();
        (gatekeeper, clock)
    }

    #[tokio::test]
    async fn test_authenticated_request_allowed() {
        let (gatekeeper, _clock) = engine(GatekeeperConfig::default());
        let decision = gatekeeper.evaluate("user-1", true).await;

        assert!(decision.allowed);
        assert!(decision.limit.is_none());
        // Tightest tier is the per-minute cap (20) minus this request.
        assert_eq!(decision.remaining, 19);
    }

    #[tokio::test]
    async fn test_anonymous_remaining_tracks_trial() {
        let (gatekeeper, _clock) = engine(GatekeeperConfig::default());
        let decision = gatekeeper.evaluate("203.0.113.7", false).await;

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let config = GatekeeperConfig {
            per_hour_cap: 0,
            ..GatekeeperConfig::default()
        };
        let clock = ManualClock::new(start());
        assert!(Gatekeeper::new(config, Arc::new(clock)).is_err());
    }

    #[tokio::test]
    async fn test_per_minute_tier_denies_with_retry_after() {
        let config = GatekeeperConfig {
            per_minute_cap: 1,
            ..GatekeeperConfig::default()
        };
        let (gatekeeper, _clock) = engine(config);

        assert!(gatekeeper.evaluate("user-1", true).await.allowed);
        let decision = gatekeeper.evaluate("user-1", true).await;

        assert!(!decision.allowed);
        assert_eq!(decision.limit, Some(LimitTier::PerMinute));
        assert_eq!(decision.retry_after_secs, Some(60));
        assert!(!decision.requires_auth);
    }

    #[tokio::test]
    async fn test_trial_exhaustion_requires_auth() {
        let (gatekeeper, _clock) = engine(GatekeeperConfig::default());

        for _ in 0..5 {
            assert!(gatekeeper.evaluate("203.0.113.7", false).await.allowed);
        }
        let decision = gatekeeper.evaluate("203.0.113.7", false).await;

        assert!(!decision.allowed);
        assert_eq!(decision.limit, Some(LimitTier::Trial));
        assert!(decision.requires_auth);
        assert!(decision.retry_after_secs.is_none());
    }

    #[tokio::test]
    async fn test_authenticating_escapes_spent_trial() {
        let (gatekeeper, _clock) = engine(GatekeeperConfig::default());

        for _ in 0..5 {
            gatekeeper.evaluate("203.0.113.7", false).await;
        }
        assert!(!gatekeeper.evaluate("203.0.113.7", false).await.allowed);

        // Same identity, now authenticated: the daily tier applies instead.
        assert!(gatekeeper.evaluate("203.0.113.7", true).await.allowed);
    }

    #[tokio::test]
    async fn test_rejection_spends_no_quota() {
        let config = GatekeeperConfig {
            daily_global_cap: 10,
            per_minute_cap: 1,
            ..GatekeeperConfig::default()
        };
        let (gatekeeper, _clock) = engine(config);

        assert!(gatekeeper.evaluate("user-1", true).await.allowed);
        for _ in 0..5 {
            assert!(!gatekeeper.evaluate("user-1", true).await.allowed);
        }

        // Only the single allowed request consumed the global budget.
        assert_eq!(gatekeeper.global_status().count, 1);
    }

    #[tokio::test]
    async fn test_global_exhaustion_short_circuits() {
        let config = GatekeeperConfig {
            daily_global_cap: 2,
            ..GatekeeperConfig::default()
        };
        let (gatekeeper, _clock) = engine(config);

        assert!(gatekeeper.evaluate("user-1", true).await.allowed);
        assert!(gatekeeper.evaluate("user-2", true).await.allowed);

        // A third identity with untouched per-identity tiers still fails.
        let decision = gatekeeper.evaluate("user-3", true).await;
        assert!(!decision.allowed);
        assert_eq!(decision.limit, Some(LimitTier::Global));
        assert!(decision.retry_after_secs.is_some());
    }

    #[tokio::test]
    async fn test_minute_window_rolls_over() {
        let config = GatekeeperConfig {
            per_minute_cap: 1,
            ..GatekeeperConfig::default()
        };
        let (gatekeeper, clock) = engine(config);

        assert!(gatekeeper.evaluate("user-1", true).await.allowed);
        assert!(!gatekeeper.evaluate("user-1", true).await.allowed);

        clock.advance(Duration::seconds(60));
        assert!(gatekeeper.evaluate("user-1", true).await.allowed);
    }

    #[tokio::test]
    async fn test_disabled_engine_allows_everything() {
        let (gatekeeper, _clock) = engine(GatekeeperConfig::disabled());

        for _ in 0..500 {
            assert!(gatekeeper.evaluate("user-1", true).await.allowed);
        }
    }

    #[tokio::test]
    async fn test_global_status_reports_midnight_reset() {
        let (gatekeeper, _clock) = engine(GatekeeperConfig::default());
        gatekeeper.evaluate("user-1", true).await;

        let status = gatekeeper.global_status();
        assert_eq!(status.count, 1);
        assert_eq!(
            status.resets_at,
            Utc.with_ymd_and_hms(2025, 3, 16, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_is_rate_limited() {
        let config = GatekeeperConfig {
            daily_global_cap: 1,
            ..GatekeeperConfig::default()
        };
        let (gatekeeper, _clock) = engine(config);

        assert!(!gatekeeper.is_rate_limited());
        gatekeeper.evaluate("user-1", true).await;
        assert!(gatekeeper.is_rate_limited());
    }

    #[tokio::test]
    async fn test_evict_idle_entries() {
        let (gatekeeper, clock) = engine(GatekeeperConfig::default());

        gatekeeper.evaluate("user-1", true).await;
        gatekeeper.evaluate("203.0.113.7", false).await;
        assert!(gatekeeper.tracked_entries().await > 0);

        clock.advance(Duration::days(2));
        let evicted = gatekeeper.evict_idle().await;
        assert!(evicted > 0);
        assert_eq!(gatekeeper.tracked_entries().await, 0);
    }

    #[tokio::test]
    async fn test_trial_remaining_accessor() {
        let (gatekeeper, _clock) = engine(GatekeeperConfig::default());
        assert_eq!(gatekeeper.trial_remaining("203.0.113.7").await, 5);

        gatekeeper.evaluate("203.0.113.7", false).await;
        assert_eq!(gatekeeper.trial_remaining("203.0.113.7").await, 4);
    }
}
