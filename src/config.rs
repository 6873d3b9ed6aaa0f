use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const SECRET_ENV: &str = "LINE_CHANNEL_SECRET";
const ACCESS_TOKEN_ENV: &str = "LINE_CHANNEL_ACCESS_TOKEN";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub replies: ReplyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LineConfig {
    /// Usually left empty in the file and supplied via LINE_CHANNEL_SECRET.
    #[serde(default)]
    pub channel_secret: String,
    /// Usually left empty in the file and supplied via LINE_CHANNEL_ACCESS_TOKEN.
    #[serde(default)]
    pub channel_access_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriggerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_trigger_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_trigger_command")]
    pub command: String,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// 0 disables the timeout.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_broadcast_message")]
    pub broadcast_message: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Fetch the sender's profile on every message. When false, a cached
    /// display name is used without calling the platform.
    #[serde(default = "default_true")]
    pub refresh_profiles: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplyConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Supports `{name}`.
    #[serde(default = "default_greeting_template")]
    pub greeting_template: String,
    /// Supports `{name}` and `{text}`.
    #[serde(default = "default_echo_template")]
    pub echo_template: String,
    #[serde(default = "default_fallback_name")]
    pub fallback_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub restore_on_startup: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret: String::new(),
            channel_access_token: String::new(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_server_addr(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: default_trigger_addr(),
            command: default_trigger_command(),
            max_payload_bytes: default_max_payload_bytes(),
            read_timeout_secs: default_read_timeout_secs(),
            broadcast_message: default_broadcast_message(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            refresh_profiles: true,
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            greeting_template: default_greeting_template(),
            echo_template: default_echo_template(),
            fallback_name: default_fallback_name(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_path: default_db_path(),
            restore_on_startup: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_base_url() -> String {
    "https://api.line.me".to_string()
}

fn default_server_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_trigger_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5001))
}

fn default_trigger_command() -> String {
    "trigger_message".to_string()
}

fn default_max_payload_bytes() -> usize {
    1024
}

fn default_read_timeout_secs() -> u64 {
    10
}

fn default_broadcast_message() -> String {
    "这是一条广播消息。".to_string()
}

fn default_greeting() -> String {
    "你好".to_string()
}

fn default_greeting_template() -> String {
    "{name}，你好！有什么我可以帮助您的吗？".to_string()
}

fn default_echo_template() -> String {
    "{name}，您说了：{text}".to_string()
}

fn default_fallback_name() -> String {
    "用户".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("linerelay.db")
}

impl Config {
    /// Load the TOML file (all defaults when it does not exist), then apply
    /// the channel credentials from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse the file alone, without environment overrides or validation.
    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Environment values win over the file when present and non-empty.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(SECRET_ENV).filter(|v| !v.is_empty()) {
            self.line.channel_secret = secret;
        }
        if let Some(token) = lookup(ACCESS_TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.line.channel_access_token = token;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.line.channel_secret.is_empty() {
            anyhow::bail!("Channel secret is not set (set {} or [line] channel_secret)", SECRET_ENV);
        }
        if self.line.channel_access_token.is_empty() {
            anyhow::bail!(
                "Channel access token is not set (set {} or [line] channel_access_token)",
                ACCESS_TOKEN_ENV
            );
        }
        if self.trigger.max_payload_bytes == 0 {
            anyhow::bail!("[trigger] max_payload_bytes must be greater than zero");
        }
        Ok(())
    }
}
