//! Core contract shared by the session layer and frontend consumers.
//!
//! This crate holds the pure parts of the client-side reconciliation layer:
//! the timeline diff protocol and reconciler, account records, the session
//! lifecycle model, and common error/channel abstractions.

/// Observable session state channels.
pub mod channel;
/// Stable backend error types.
pub mod error;
/// Session lifecycle state machine.
pub mod state_machine;
/// Timeline reconciler and subscriber-owned buffer.
pub mod timeline;
/// Diff protocol, timeline payload, and account record types.
pub mod types;

pub use channel::{SessionChannels, SessionEventStream};
pub use error::{BackendError, BackendErrorCategory};
pub use state_machine::SessionStateMachine;
pub use timeline::{
    TimelineApply, TimelineBuffer, TimelineChange, TimelineKeys, apply, compare_entries,
    insertion_point, upsert,
};
pub use types::{
    AccountRecord, SendState, SessionEvent, SessionState, StableKey, TimelineDiff,
    TimelineMessage,
};
