use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtoError;

/// Unique identifier for a transcript message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a new random message identifier.
    ///
    /// Identifiers are UUID v4 values, so two ids minted in the same clock
    /// tick are still distinct.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the raw message identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message role in the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message authored by the end user.
    User,
    /// Message authored by the assistant.
    Assistant,
    /// System-level notice.
    System,
}

impl Role {
    /// Maps a transcript role onto the provider history role.
    ///
    /// System entries are never replayed to the provider.
    pub fn history_role(self) -> Option<HistoryRole> {
        match self {
            Role::User => Some(HistoryRole::User),
            Role::Assistant => Some(HistoryRole::Model),
            Role::System => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(ProtoError::InvalidRole(other.to_string())),
        }
    }
}

/// Role of a history entry as the provider understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Model,
}

impl HistoryRole {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryRole::User => "user",
            HistoryRole::Model => "model",
        }
    }
}

/// How the `content` of a message is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// A `data:` URI holding a base64 image.
    Image,
    /// A user-safe error description.
    Error,
}

/// Base64-encoded binary resource attached to a user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// MIME type of the payload (e.g. `image/png`).
    pub mime_type: String,
    /// Base64 payload without any `data:` prefix.
    pub data: String,
}

impl Attachment {
    /// Creates an attachment descriptor from an already-encoded payload.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Renders the descriptor as `data:<mime>;base64,<data>`.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Parses a `data:<mime>;base64,<data>` URI back into a descriptor.
    pub fn parse_data_uri(uri: &str) -> Result<Self, ProtoError> {
        let invalid = || ProtoError::InvalidDataUri(uri.chars().take(64).collect());
        let rest = uri.strip_prefix("data:").ok_or_else(invalid)?;
        let (header, data) = rest.split_once(',').ok_or_else(invalid)?;
        let mime_type = header.strip_suffix(";base64").ok_or_else(invalid)?;
        if mime_type.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(mime_type, data))
    }
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable unique id assigned at creation.
    pub id: MessageId,
    /// Author of the message.
    pub role: Role,
    /// Interpretation of `content`.
    pub kind: MessageKind,
    /// Text, image data URI, or error description depending on `kind`.
    pub content: String,
    /// Creation time in UTC.
    pub timestamp: DateTime<Utc>,
    /// Upload accompanying a user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// True only while an assistant reply is still receiving fragments.
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    /// Creates the assistant greeting that opens every transcript.
    pub fn seed(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            kind: MessageKind::Text,
            content: content.into(),
            timestamp: Utc::now(),
            attachment: None,
            streaming: false,
        }
    }

    /// Creates a user text message with an optional upload.
    pub fn user(content: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            kind: MessageKind::Text,
            content: content.into(),
            timestamp: Utc::now(),
            attachment,
            streaming: false,
        }
    }

    /// Creates the streaming assistant placeholder reserved for a reply.
    pub fn assistant_placeholder(provisional: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            kind: MessageKind::Text,
            content: provisional.into(),
            timestamp: Utc::now(),
            attachment: None,
            streaming: true,
        }
    }

    /// Returns a copy carrying `content` as its full text.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self.clone()
        }
    }

    /// Returns a copy that is no longer streaming, content unchanged.
    pub fn finalized(&self) -> Self {
        Self {
            streaming: false,
            ..self.clone()
        }
    }

    /// Returns a finalized image copy holding the given data URI.
    pub fn as_image(&self, data_uri: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Image,
            content: data_uri.into(),
            streaming: false,
            ..self.clone()
        }
    }

    /// Returns a finalized error copy; any partial content is overwritten.
    pub fn as_error(&self, description: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            content: description.into(),
            streaming: false,
            ..self.clone()
        }
    }

    /// Returns true once the message can no longer change.
    pub fn is_terminal(&self) -> bool {
        !self.streaming
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn message_id_new_creates_distinct_values() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert!(!a.as_str().is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn role_display_and_parse_round_trip() {
        for role in [Role::User, Role::Assistant, Role::System] {
            let parsed = Role::from_str(&role.to_string()).expect("role should parse");
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn role_parse_invalid_value_returns_error() {
        let err = Role::from_str("model").expect_err("invalid role should fail");
        match err {
            ProtoError::InvalidRole(value) => assert_eq!(value, "model"),
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn history_role_skips_system_entries() {
        assert_eq!(Role::User.history_role(), Some(HistoryRole::User));
        assert_eq!(Role::Assistant.history_role(), Some(HistoryRole::Model));
        assert_eq!(Role::System.history_role(), None);
        assert_eq!(HistoryRole::Model.as_str(), "model");
    }

    #[test]
    fn attachment_renders_data_uri() {
        let attachment = Attachment::new("image/png", "Zm9v");
        assert_eq!(attachment.data_uri(), "data:image/png;base64,Zm9v");
    }

    #[test]
    fn attachment_parses_data_uri() {
        let parsed = Attachment::parse_data_uri("data:image/jpeg;base64,YWJj").expect("parse");
        assert_eq!(parsed.mime_type, "image/jpeg");
        assert_eq!(parsed.data, "YWJj");
    }

    #[test]
    fn attachment_rejects_malformed_data_uri() {
        for bad in ["", "image/png;base64,abc", "data:image/png,abc", "data:;base64,abc"] {
            assert!(
                matches!(
                    Attachment::parse_data_uri(bad),
                    Err(ProtoError::InvalidDataUri(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn attachment_serializes_with_camel_case_mime_type() {
        let json = serde_json::to_value(Attachment::new("image/gif", "R0lG")).expect("json");
        assert_eq!(json["mimeType"], "image/gif");
        assert_eq!(json["data"], "R0lG");
    }

    #[test]
    fn user_message_carries_attachment_and_is_not_streaming() {
        let msg = Message::user("look", Some(Attachment::new("image/png", "Zm9v")));
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(!msg.streaming);
        assert!(msg.attachment.is_some());
    }

    #[test]
    fn placeholder_transitions_keep_identity() {
        let placeholder = Message::assistant_placeholder("");
        assert!(placeholder.streaming);

        let partial = placeholder.with_content("Hel");
        assert_eq!(partial.id, placeholder.id);
        assert!(partial.streaming);

        let done = partial.finalized();
        assert_eq!(done.content, "Hel");
        assert!(done.is_terminal());

        let failed = partial.as_error("boom");
        assert_eq!(failed.kind, MessageKind::Error);
        assert_eq!(failed.content, "boom");
        assert!(!failed.streaming);

        let image = placeholder.as_image("data:image/png;base64,Zm9v");
        assert_eq!(image.kind, MessageKind::Image);
        assert_eq!(image.timestamp, placeholder.timestamp);
        assert!(!image.streaming);
    }
}
