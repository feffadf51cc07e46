use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Models the session can route a turn to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChatModel {
    /// Fast streaming chat model.
    #[default]
    #[serde(rename = "gemini-2.5-flash")]
    Flash,
    /// Higher-quality streaming chat model.
    #[serde(rename = "gemini-3-pro-preview")]
    Pro,
    /// Single-shot image generation model.
    #[serde(rename = "gemini-2.5-flash-image")]
    ImageGen,
}

impl ChatModel {
    /// All selectable models in menu order.
    pub const fn all() -> &'static [Self] {
        &[Self::Flash, Self::Pro, Self::ImageGen]
    }

    /// Provider model id.
    pub fn id(self) -> &'static str {
        match self {
            Self::Flash => "gemini-2.5-flash",
            Self::Pro => "gemini-3-pro-preview",
            Self::ImageGen => "gemini-2.5-flash-image",
        }
    }

    /// Short alias accepted on the command line.
    pub fn alias(self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Pro => "pro",
            Self::ImageGen => "image",
        }
    }

    /// Human-readable label for menus.
    pub fn label(self) -> &'static str {
        match self {
            Self::Flash => "Gemini 2.5 Flash",
            Self::Pro => "Gemini 3.0 Pro",
            Self::ImageGen => "Imagen (via Flash)",
        }
    }

    /// Returns true when turns on this model take the image-generation branch.
    pub fn is_image_generation(self) -> bool {
        matches!(self, Self::ImageGen)
    }
}

impl std::fmt::Display for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for ChatModel {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|m| m.id() == needle || m.alias() == needle)
            .ok_or_else(|| ProtoError::InvalidModel(s.to_string()))
    }
}
