use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Response channel failure.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Turn submission was rejected.
    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Response channel errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// Provider throttled the request.
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Transport failure after the stream started.
    #[error("Stream interrupted: {0}")]
    Stream(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Synchronous rejections of a turn submission. These never reach the transcript.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    /// A previous turn has not reached a terminal phase.
    #[error("A turn is already in progress")]
    Busy,

    /// Neither prompt text nor an attachment was supplied.
    #[error("Nothing to send: prompt is empty and no attachment is staged")]
    EmptySubmission,
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid role string value.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Unknown model id or alias.
    #[error("Unknown model: {0}")]
    InvalidModel(String),

    /// Malformed `data:` URI.
    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),

    /// A message with this id is already in the transcript.
    #[error("Duplicate message id: {0}")]
    DuplicateMessageId(String),
}
