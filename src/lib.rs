//! Wayfarer Gatekeeper Library
//!
//! Shared admission-control layer for the Wayfarer trip-planning service:
//! decides, for every incoming request, whether it may proceed under a
//! fixed daily budget shared by all callers, and tracks per-conversation
//! usage. Identity resolution and response generation live elsewhere; this
//! crate consumes an opaque identity plus an `authenticated` flag and
//! returns a [`PolicyDecision`](quota::PolicyDecision) with usage counters.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod quota;
pub mod session;
pub mod sweep;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GatekeeperConfig;
pub use error::GatekeeperError;
pub use quota::{Gatekeeper, LimitTier, PolicyDecision};
pub use session::{ConversationSink, ConversationSummary, SessionRegistry};
