//! Chat session core: transcript store, response channel, and turn controller.

pub mod gemini;
pub mod llm;
pub mod session;
pub mod transcript;

/// Gemini REST response channel.
pub use gemini::GeminiProvider;
/// Response channel request models and provider interface.
pub use llm::{ChatRequest, FragmentStream, HistoryEntry, ImageRequest, ResponseChannel};
/// Turn controller owning one conversation.
pub use session::ChatSession;
/// Observable in-memory transcript.
pub use transcript::TranscriptStore;
