//! Gatekeeper Configuration
//!
//! Caps for every quota tier plus the idle-eviction threshold. Values come
//! from defaults, a deserialized config file, or environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GatekeeperError;

/// Default daily budget shared by all callers
pub const DEFAULT_DAILY_GLOBAL_CAP: u32 = 200;
/// Default per-identity burst limit (requests per minute)
pub const DEFAULT_PER_MINUTE_CAP: u32 = 20;
/// Default per-identity sustained limit (requests per hour)
pub const DEFAULT_PER_HOUR_CAP: u32 = 100;
/// Default daily allowance for authenticated identities
pub const DEFAULT_AUTHENTICATED_DAILY_CAP: u32 = 50;
/// Default one-shot allowance for anonymous identities
pub const DEFAULT_ANONYMOUS_TRIAL_CAP: u32 = 5;
/// Default idle-eviction threshold in seconds (one day)
pub const DEFAULT_IDLE_EVICTION_SECS: u64 = 86_400;

/// Admission-control configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Enable admission checks (disabled bypasses every tier)
    pub enabled: bool,

    /// Daily budget shared by all identities
    pub daily_global_cap: u32,

    /// Per-identity requests per minute
    pub per_minute_cap: u32,

    /// Per-identity requests per hour
    pub per_hour_cap: u32,

    /// Daily allowance for authenticated identities
    pub authenticated_daily_cap: u32,

    /// One-shot allowance for anonymous identities
    pub anonymous_trial_cap: u32,

    /// Seconds of inactivity before per-identity state is evicted
    pub idle_eviction_threshold_secs: u64,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_global_cap: DEFAULT_DAILY_GLOBAL_CAP,
            per_minute_cap: DEFAULT_PER_MINUTE_CAP,
            per_hour_cap: DEFAULT_PER_HOUR_CAP,
            authenticated_daily_cap: DEFAULT_AUTHENTICATED_DAILY_CAP,
            anonymous_trial_cap: DEFAULT_ANONYMOUS_TRIAL_CAP,
            idle_eviction_threshold_secs: DEFAULT_IDLE_EVICTION_SECS,
        }
    }
}

impl GatekeeperConfig {
    /// Create a configuration with default caps
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GATEKEEPER_RATE_LIMIT_ENABLED") {
            config.enabled = val.parse().unwrap_or(true);
        }

        if let Ok(val) = std::env::var("GATEKEEPER_DAILY_API_LIMIT") {
            if let Ok(cap) = val.parse() {
                config.daily_global_cap = cap;
            }
        }

        if let Ok(val) = std::env::var("GATEKEEPER_RATE_LIMIT_PER_MINUTE") {
            if let Ok(cap) = val.parse() {
                config.per_minute_cap = cap;
            }
        }

        if let Ok(val) = std::env::var("GATEKEEPER_RATE_LIMIT_PER_HOUR") {
            if let Ok(cap) = val.parse() {
                config.per_hour_cap = cap;
            }
        }

        if let Ok(val) = std::env::var("GATEKEEPER_USER_DAILY_LIMIT") {
            if let Ok(cap) = val.parse() {
                config.authenticated_daily_cap = cap;
            }
        }

        if let Ok(val) = std::env::var("GATEKEEPER_ANONYMOUS_FREE_LIMIT") {
            if let Ok(cap) = val.parse() {
                config.anonymous_trial_cap = cap;
            }
        }

        if let Ok(val) = std::env::var("GATEKEEPER_IDLE_EVICTION_SECS") {
            if let Ok(secs) = val.parse() {
                config.idle_eviction_threshold_secs = secs;
            }
        }

        config
    }

    /// Reject unusable values; called once at engine construction
    pub fn validate(&self) -> Result<(), GatekeeperError> {
        let caps = [
            ("daily_global_cap", self.daily_global_cap),
            ("per_minute_cap", self.per_minute_cap),
            ("per_hour_cap", self.per_hour_cap),
            ("authenticated_daily_cap", self.authenticated_daily_cap),
            ("anonymous_trial_cap", self.anonymous_trial_cap),
        ];

        for (field, cap) in caps {
            if cap == 0 {
                return Err(GatekeeperError::InvalidConfig {
                    field,
                    value: cap.to_string(),
                });
            }
        }

        if self.idle_eviction_threshold_secs == 0 {
            return Err(GatekeeperError::InvalidConfig {
                field: "idle_eviction_threshold_secs",
                value: self.idle_eviction_threshold_secs.to_string(),
            });
        }

        Ok(())
    }

    /// Idle-eviction threshold as a duration
    pub fn idle_eviction_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_threshold_secs)
    }

    /// Disable admission checks (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
