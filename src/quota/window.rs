//! Window Counter
//!
//! A single bounded counter with a calendar-aligned reset boundary: the
//! atomic building block every quota tier is made of. The counter never
//! exceeds its cap, resets lazily when a request arrives in a new window,
//! and keeps window starts aligned to the calendar (midnight UTC for daily
//! windows, top-of-hour, top-of-minute) rather than sliding from the first
//! touch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::GatekeeperError;

/// Reset cadence of a window counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    /// Resets at the top of every minute
    PerMinute,
    /// Resets at the top of every hour
    PerHour,
    /// Resets at midnight UTC
    PerDay,
}

impl WindowKind {
    /// Window length in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            WindowKind::PerMinute => 60,
            WindowKind::PerHour => 3_600,
            WindowKind::PerDay => 86_400,
        }
    }

    /// Boundary-aligned window start at or before `now`.
    ///
    /// Unix timestamps make this integer arithmetic: minute, hour, and day
    /// boundaries are exact multiples of the window length in UTC.
    pub fn align(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let span = self.duration_secs() as i64;
        let secs = now.timestamp();
        DateTime::from_timestamp(secs - secs.rem_euclid(span), 0).unwrap_or(now)
    }

    /// End of the window containing `now`
    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.align(now) + Duration::seconds(self.duration_secs() as i64)
    }
}

/// Outcome of a single `try_increment`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the increment was applied
    pub accepted: bool,
    /// Capacity left in the current window after this call
    pub remaining: u32,
}

/// Usage snapshot of one counter, for status endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Requests admitted in the current window
    pub count: u32,
    /// Window capacity
    pub limit: u32,
    /// Capacity left in the current window
    pub remaining: u32,
    /// Instant the window resets
    pub resets_at: DateTime<Utc>,
    /// Percentage of the window used, one decimal
    pub usage_percent: f64,
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: DateTime<Utc>,
    last_touched: DateTime<Utc>,
}

/// A thread-safe bounded counter over one calendar-aligned window.
///
/// The reset-check-increment sequence runs inside a single critical section,
/// so concurrent callers can never observe a stale count or double-spend the
/// last slot.
#[derive(Debug)]
pub struct WindowCounter {
    cap: u32,
    kind: WindowKind,
    tier: &'static str,
    state: Mutex<WindowState>,
}

impl WindowCounter {
    /// Create a counter. A zero cap is a configuration error.
    pub fn new(
        cap: u32,
        kind: WindowKind,
        tier: &'static str,
        now: DateTime<Utc>,
    ) -> Result<Self, GatekeeperError> {
        if cap == 0 {
            return Err(GatekeeperError::InvalidConfig {
                field: "cap",
                value: cap.to_string(),
            });
        }
        Ok(Self {
            cap,
            kind,
            tier,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: kind.align(now),
                last_touched: now,
            }),
        })
    }

    /// Window capacity
    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Reset cadence
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Try to admit one request.
    ///
    /// Performs the lazy window reset, then increments if capacity remains.
    /// Returns `CounterCorrupted` if the count is ever observed above the
    /// cap, which callers must treat as a denial.
    pub fn try_increment(&self, now: DateTime<Utc>) -> Result<Admission, GatekeeperError> {
        let mut state = self.state.lock().unwrap();
        self.roll_window(&mut state, now);
        state.last_touched = now;

        if state.count > self.cap {
            return Err(GatekeeperError::CounterCorrupted {
                tier: self.tier,
                count: state.count,
                cap: self.cap,
            });
        }

        if state.count < self.cap {
            state.count += 1;
            Ok(Admission {
                accepted: true,
                remaining: self.cap - state.count,
            })
        } else {
            Ok(Admission {
                accepted: false,
                remaining: 0,
            })
        }
    }

    /// Undo one increment made earlier in the same window.
    ///
    /// Used by the policy engine when a later tier rejects a request that
    /// this counter already admitted. A no-op if the window has rolled over
    /// since the increment: that count is already gone.
    pub fn rollback(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if state.window_start == self.kind.align(now) {
            state.count = state.count.saturating_sub(1);
        }
    }

    /// Capacity left in the window containing `now`
    pub fn remaining(&self, now: DateTime<Utc>) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.roll_window(&mut state, now);
        self.cap.saturating_sub(state.count)
    }

    /// Seconds until the window containing `now` resets
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.kind.window_end(now) - now).num_seconds().max(0) as u64
    }

    /// Usage snapshot for status reporting
    pub fn snapshot(&self, now: DateTime<Utc>) -> WindowUsage {
        let mut state = self.state.lock().unwrap();
        self.roll_window(&mut state, now);
        let usage_percent =
            ((state.count as f64 / self.cap as f64) * 1000.0).round() / 10.0;
        WindowUsage {
            count: state.count,
            limit: self.cap,
            remaining: self.cap.saturating_sub(state.count),
            resets_at: self.kind.window_end(now),
            usage_percent,
        }
    }

    /// Time since the counter was last touched, for the idle sweep
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let state = self.state.lock().unwrap();
        now - state.last_touched
    }

    fn roll_window(&self, state: &mut WindowState, now: DateTime<Utc>) {
        let aligned = self.kind.align(now);
        if aligned > state.window_start {
            state.count = 0;
            state.window_start = aligned;
        }
    }
}
