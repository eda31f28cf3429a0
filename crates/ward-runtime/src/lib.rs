//! # ward-runtime
//!
//! The per-turn engine: the group-chat scheduler that picks speakers and
//! decides termination under deterministic guards, and the turn controller
//! that owns the 8-step pipeline from ingress to persistence. The
//! controller is the only component that sees both the pre- and
//! post-scheduler history, and the only one that issues user-visible
//! replies.

pub mod ingress;
pub mod scheduler;
pub mod turn;

pub use ingress::{BufferSink, ChannelSink, ReplySink, TurnRequest};
pub use scheduler::{GroupChatScheduler, TurnOutcome};
pub use turn::{TurnController, TurnError};
