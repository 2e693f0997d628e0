//! Error types for the admission-control core.
//!
//! Note that quota rejections are not errors: a request that hits a limit
//! gets an ordinary denied [`PolicyDecision`](crate::quota::PolicyDecision).
//! The variants here cover invalid configuration (fatal at startup) and
//! corrupted shared state (denied fail-closed at evaluation time).

/// Error types for gatekeeper operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatekeeperError {
    /// A cap or threshold was zero or otherwise unusable at construction
    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig {
        /// Name of the offending configuration field
        field: &'static str,
        /// The rejected value
        value: String,
    },

    /// A counter was observed outside `0 <= count <= cap`
    #[error("Counter corrupted for tier '{tier}': count {count} exceeds cap {cap}")]
    CounterCorrupted {
        /// Tier whose counter violated its invariant
        tier: &'static str,
        /// Observed count
        count: u32,
        /// Configured cap
        cap: u32,
    },
}
