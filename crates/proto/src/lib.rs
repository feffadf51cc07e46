//! Shared transcript types for the chat session, response channel, and CLI.
//!
//! This crate defines the serializable message/turn structures and the
//! strongly-typed error enums shared across the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod model;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of turn lifecycle types.
pub use event::{Turn, TurnEvent, TurnOutcome, TurnPhase};
/// Re-export of transcript message types.
pub use message::{Attachment, HistoryRole, Message, MessageId, MessageKind, Role};
/// Re-export of the selectable model catalog.
pub use model::ChatModel;
