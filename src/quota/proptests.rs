//! Property-Based Tests for the Quota Engine
//!
//! Verifies counter invariants over random operation sequences:
//!
//! - **Cap invariant**: no interleaving of increments, rollbacks, and time
//!   jumps can push a counter's count outside `0 ≤ count ≤ cap`
//! - **Alignment**: window starts always land on calendar boundaries at or
//!   before the observation instant
//! - **Trial countdown**: remaining capacity decreases monotonically and
//!   exhaustion is permanent

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use crate::quota::trial::TrialTracker;
use crate::quota::window::{WindowCounter, WindowKind};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

// Helper: one step of a random counter workload
#[derive(Debug, Clone)]
enum CounterOp {
    Increment,
    Rollback,
    Advance(i64),
}

fn arb_counter_op() -> impl Strategy<Value = CounterOp> {
    prop_oneof![
        3 => Just(CounterOp::Increment),
        1 => Just(CounterOp::Rollback),
        1 => (1i64..7_200).prop_map(CounterOp::Advance),
    ]
}

fn arb_window_kind() -> impl Strategy<Value = WindowKind> {
    prop_oneof![
        Just(WindowKind::PerMinute),
        Just(WindowKind::PerHour),
        Just(WindowKind::PerDay),
    ]
}

proptest! {
    /// No operation sequence can push the count above the cap or below zero.
    #[test]
    fn prop_count_stays_within_bounds(
        cap in 1u32..50,
        kind in arb_window_kind(),
        ops in prop::collection::vec(arb_counter_op(), 1..200)
    ) {
        let mut now = base_time();
        let counter = WindowCounter::new(cap, kind, "test", now).unwrap();
        let mut admitted_this_window = 0u32;

        for op in ops {
            match op {
                CounterOp::Increment => {
                    let admission = counter.try_increment(now).unwrap();
                    if admission.accepted {
                        admitted_this_window += 1;
                    }
                    prop_assert!(admitted_this_window <= cap);
                    prop_assert!(admission.remaining <= cap);
                }
                CounterOp::Rollback => {
                    counter.rollback(now);
                    admitted_this_window = admitted_this_window.saturating_sub(1);
                }
                CounterOp::Advance(secs) => {
                    let before = kind.align(now);
                    now += Duration::seconds(secs);
                    if kind.align(now) > before {
                        admitted_this_window = 0;
                    }
                }
            }
            prop_assert!(counter.remaining(now) <= cap);
        }
    }

    /// Exactly `cap` increments are admitted within any single window.
    #[test]
    fn prop_exactly_cap_admissions_per_window(
        cap in 1u32..30,
        attempts in 1usize..100
    ) {
        let now = base_time();
        let counter = WindowCounter::new(cap, WindowKind::PerHour, "test", now).unwrap();

        let admitted = (0..attempts)
            .filter(|_| counter.try_increment(now).unwrap().accepted)
            .count();
        prop_assert_eq!(admitted, attempts.min(cap as usize));
    }

    /// Aligned window starts land on exact boundaries at or before `now`.
    #[test]
    fn prop_alignment_is_boundary_exact(
        kind in arb_window_kind(),
        offset_secs in 0i64..31_536_000
    ) {
        let now = base_time() + Duration::seconds(offset_secs);
        let aligned = kind.align(now);

        prop_assert!(aligned <= now);
        prop_assert!(now - aligned < Duration::seconds(kind.duration_secs() as i64));
        prop_assert_eq!(aligned.timestamp() % kind.duration_secs() as i64, 0);
        // Aligning an aligned instant changes nothing.
        prop_assert_eq!(kind.align(aligned), aligned);
    }

    /// Trial remaining decreases by one per accepted consume, never resets.
    #[test]
    fn prop_trial_countdown_is_monotonic(
        cap in 1u32..20,
        attempts in 1usize..60,
        advance_secs in prop::collection::vec(0i64..1_000_000, 1..60)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let tracker = TrialTracker::new(cap).unwrap();
            let mut now = base_time();
            let mut last_remaining = cap;

            for step in 0..attempts {
                now += Duration::seconds(advance_secs[step % advance_secs.len()]);
                let outcome = tracker.try_consume("192.0.2.1", now).await;
                if outcome.accepted {
                    prop_assert_eq!(outcome.remaining, last_remaining - 1);
                    last_remaining = outcome.remaining;
                } else {
                    prop_assert_eq!(last_remaining, 0);
                    prop_assert_eq!(outcome.remaining, 0);
                }
            }
            Ok(())
        })?;
    }
}
