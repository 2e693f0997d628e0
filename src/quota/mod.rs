//! Multi-Tier Quota Engine
//!
//! Admission control under a fixed daily budget shared by all callers,
//! layered with per-identity burst, sustained, and daily allowances, plus a
//! one-shot trial for anonymous identities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Gatekeeper                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  global daily ──► per-minute ──► per-hour ──► daily │ trial │
//! │   (shared)       (identity)     (identity)    (by auth)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  first rejection short-circuits; committed tiers roll back  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Calendar-aligned bounded counter: the atomic building block
pub mod window;

// Per-identity counter maps for one tier
pub mod store;

// One-shot trial allowance for anonymous callers
pub mod trial;

// Ordered, two-phase policy evaluation
pub mod engine;

// Re-export commonly used types for convenience
pub use engine::{Gatekeeper, LimitTier, PolicyDecision};
pub use store::IdentityWindows;
pub use trial::{TrialOutcome, TrialTracker};
pub use window::{Admission, WindowCounter, WindowKind, WindowUsage};

// Property-based tests module
#[cfg(test)]
mod proptests;
