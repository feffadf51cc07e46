use chrono::{DateTime, Utc};

use crate::message::{Message, MessageId};
use crate::model::ChatModel;

/// One in-flight request/response exchange. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Id of the user message that opened the turn.
    pub user_message_id: MessageId,
    /// Id of the assistant placeholder that receives the reply.
    pub assistant_message_id: MessageId,
    /// Model captured when the turn was accepted.
    pub model: ChatModel,
    /// Acceptance time in UTC.
    pub requested_at: DateTime<Utc>,
}

/// Lifecycle phase of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// No turn is active.
    #[default]
    Idle,
    UserAppended,
    AssistantPlaceholdered,
    /// Fragments are being applied to the placeholder.
    Streaming,
    /// Reply completed normally.
    Finalized,
    /// Reply replaced by an error message.
    Errored,
}

impl TurnPhase {
    /// Returns true for the absorbing phases a turn ends in.
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnPhase::Finalized | TurnPhase::Errored)
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::UserAppended => "user-appended",
            TurnPhase::AssistantPlaceholdered => "assistant-placeholdered",
            TurnPhase::Streaming => "streaming",
            TurnPhase::Finalized => "finalized",
            TurnPhase::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Result of a turn that ran to a terminal phase.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub turn: Turn,
    /// Always `Finalized` or `Errored`.
    pub phase: TurnPhase,
}

/// Real-time progress events emitted while a turn runs.
///
/// These events are sent via `tokio::sync::mpsc` from
/// `ChatSession::submit_turn_with_progress()` so that a terminal or other
/// consumer can render the reply while it streams.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The turn moved to a new phase.
    PhaseChanged { phase: TurnPhase },
    /// A fragment was applied to the placeholder.
    Fragment { delta: String, accumulated: String },
    /// The placeholder reached its final state.
    Completed { phase: TurnPhase, message: Message },
}
