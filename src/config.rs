//! Configuration types.
//!
//! Loaded from a YAML file (`config/config.yaml` unless `CHAT_RELAY_CONFIG`
//! points elsewhere). Every section has defaults, so a partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Default registry manifest location.
pub const DEFAULT_REGISTRY_PATH: &str = "config/registry.yaml";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rag: RagConfig,
    pub chat: ChatDefaults,
    pub session: SessionConfig,
    pub publish: PublishConfig,
    pub memory: MemoryConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

/// Ingress HTTP server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for uploaded image/voice/file payloads.
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

/// RAG backend connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Sent as a bearer token when present.
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_token: Option<SecretString>,
    /// Page size used when listing conversations.
    pub list_page_size: u32,
    /// Upper bound on pages walked while looking for the highest id.
    pub max_list_pages: u32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
            api_token: None,
            list_page_size: 20,
            max_list_pages: 50,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

impl RagConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Turn settings attached to every chat request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatDefaults {
    pub use_memory: bool,
    pub use_knowledge: bool,
    pub knowledge_limit: u32,
    pub use_web_search: bool,
    pub web_search_limit: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            use_memory: true,
            use_knowledge: true,
            knowledge_limit: 0,
            use_web_search: true,
            web_search_limit: 3,
            temperature: 0.5,
            max_tokens: 1000,
        }
    }
}

/// Remote conversation provisioning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `{id}` is replaced with the allocated conversation id.
    pub title_template: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            title_template: "User {id}".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

impl SessionConfig {
    pub fn title_for(&self, conversation_id: i64) -> String {
        self.title_template
            .replace("{id}", &conversation_id.to_string())
    }
}

/// Outbound publish hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Unacknowledged payloads retained per topic.
    pub backlog_capacity: usize,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            backlog_capacity: 64,
        }
    }
}

/// Memory processor settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// JSON-lines journal appended by the write worker. Log-only when unset.
    pub journal_path: Option<PathBuf>,
}

/// Processor registry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub manifest_path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Daily-rolling log files are written here when set.
    pub directory: Option<PathBuf>,
}

impl AppConfig {
    /// Load from a YAML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw, path)
    }

    /// Parse YAML text. `path` is only used in error messages.
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path from the environment and load it, then apply
    /// environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("CHAT_RELAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load(&path)?;

        if let Ok(url) = std::env::var("CHAT_RELAY_RAG_URL") {
            config.rag.base_url = url;
        }
        if let Ok(port) = std::env::var("CHAT_RELAY_PORT") {
            config.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CHAT_RELAY_PORT".to_string(),
                message: format!("not a port number: {port}"),
            })?;
        }
        if let Ok(registry) = std::env::var("CHAT_RELAY_REGISTRY") {
            config.registry.manifest_path = PathBuf::from(registry);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.chat.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "chat.temperature".to_string(),
                message: format!("{} is outside 0.0..=1.0", self.chat.temperature),
            });
        }
        if self.rag.list_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rag.list_page_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !self.session.title_template.contains("{id}") {
            return Err(ConfigError::InvalidValue {
                key: "session.title_template".to_string(),
                message: "must contain {id}".to_string(),
            });
        }
        Ok(())
    }
}
