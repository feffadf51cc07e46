//! Response channel abstraction over the generative AI provider.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use proto::{Attachment, ChatModel, HistoryRole, LlmError, Message, MessageKind};

/// Ordered, finite, non-restartable sequence of text fragments.
///
/// An `Err` item ends the reply; fragments delivered before it stay valid.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// Text stand-in replayed for generated images, which are never sent back.
pub const IMAGE_HISTORY_MARKER: &str = "[generated image]";

/// One prior exchange replayed to the provider as context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Provider-facing role.
    pub role: HistoryRole,
    /// Text content only; attachments are never replayed.
    pub text: String,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Model,
            text: text.into(),
        }
    }
}

/// Streaming chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Target model.
    pub model: ChatModel,
    /// Current user prompt.
    pub prompt: String,
    /// Upload accompanying the current prompt only.
    pub attachment: Option<Attachment>,
    /// Prior transcript projected to role + text.
    pub history: Vec<HistoryEntry>,
}

/// Single-shot image generation request
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
}

/// Provider abstraction consumed by the chat session.
#[async_trait]
pub trait ResponseChannel: Send + Sync {
    /// Starts a streaming chat reply.
    ///
    /// May fail before any fragment is produced, or yield an `Err` mid-stream.
    async fn stream_chat(&self, req: ChatRequest) -> Result<FragmentStream, LlmError>;

    /// Generates one image and returns it as `data:<mime>;base64,<data>`.
    ///
    /// Returns an empty string when the provider reply holds no image part.
    async fn generate_image(&self, req: ImageRequest) -> Result<String, LlmError>;
}

/// Projects transcript messages onto provider history.
///
/// System notices and error replies are dropped, images are replaced by
/// [`IMAGE_HISTORY_MARKER`], and attachments are left out.
pub fn project_history(messages: &[Message]) -> Vec<HistoryEntry> {
    messages
        .iter()
        .filter_map(|m| {
            let role = m.role.history_role()?;
            let text = match m.kind {
                MessageKind::Text => m.content.clone(),
                MessageKind::Image => IMAGE_HISTORY_MARKER.to_string(),
                MessageKind::Error => return None,
            };
            Some(HistoryEntry { role, text })
        })
        .collect()
}
