//! Session and Conversation Registry
//!
//! Tracks the single live conversation per identity and reports lifecycle
//! events to an optional external telemetry collaborator.

pub mod registry;
pub mod sink;

pub use registry::{SessionRecord, SessionRegistry};
pub use sink::{ConversationSink, ConversationStarted, ConversationSummary};
