use agent::gemini::{DEFAULT_BASE_URL, DEFAULT_SYSTEM_INSTRUCTION};
use proto::{ChatModel, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

/// Provider connection and chat defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Gemini API key. Empty means "not configured".
    #[serde(default)]
    pub api_key: String,
    /// Model id or alias selected at startup.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            system_instruction: default_system_instruction(),
        }
    }
}

fn default_model() -> String {
    ChatModel::default().id().to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

/// Terminal presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Directory generated images are written to.
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
        }
    }
}

fn default_image_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.omnichat/images")
}

impl AgentConfig {
    /// Parses the configured model id or alias.
    pub fn effective_model(&self) -> Result<ChatModel, ConfigError> {
        self.model
            .parse()
            .map_err(|e: proto::ProtoError| ConfigError::InvalidValue {
                field: "agent.model".to_string(),
                reason: e.to_string(),
            })
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let cwd = std::env::current_dir().ok()?.join("omnichat.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".omnichat").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        // API_KEY wins over the Gemini-specific name
        if let Ok(key) = std::env::var("API_KEY") {
            config.agent.api_key = key;
        } else if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.agent.api_key = key;
        }
        if let Ok(model) = std::env::var("OMNICHAT_MODEL") {
            config.agent.model = model;
        }
        if let Ok(base_url) = std::env::var("OMNICHAT_BASE_URL") {
            config.agent.base_url = base_url;
        }

        debug!(
            model = %config.agent.model,
            base_url = %config.agent.base_url,
            has_api_key = !config.agent.api_key.is_empty(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Returns the API key, failing when none is configured.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        let key = self.agent.api_key.trim();
        if key.is_empty() {
            return Err(ConfigError::MissingField("agent.api_key".to_string()));
        }
        Ok(key)
    }
}
