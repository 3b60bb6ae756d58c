use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PLACEHOLDER_MATRIX_ACCESS_TOKEN: &str = "your_access_token";
const PLACEHOLDER_MATRIX_ROOM_ID: &str = "!room_id:example.com";
const PLACEHOLDER_TELEGRAM_BOT_TOKEN: &str = "your_telegram_bot_token";
const PLACEHOLDER_TELEGRAM_CHAT_ID: &str = "your_chat_id";
const PLACEHOLDER_MAX_AUTH_TOKEN: &str = "your_max_token";
const PLACEHOLDER_MAX_USER_ID: &str = "your_max_user_id";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub max: MaxConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatrixConfig {
    #[serde(default = "default_matrix_homeserver")]
    pub homeserver: String,
    #[serde(default = "default_matrix_user_id")]
    pub user_id: String,
    #[serde(default = "default_matrix_access_token")]
    pub access_token: String,
    #[serde(default = "default_matrix_room_id")]
    pub room_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_bot_token")]
    pub bot_token: String,
    /// Numeric chat id or `@channelusername`
    #[serde(default = "default_telegram_chat_id")]
    pub chat_id: String,
    /// Bot API base URL override (self-hosted Bot API server)
    #[serde(default)]
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaxConfig {
    #[serde(default = "default_max_auth_token")]
    pub auth_token: String,
    #[serde(default = "default_max_user_id")]
    pub user_id: String,
    #[serde(default = "default_max_api_url")]
    pub api_url: String,
    #[serde(default = "default_max_ws_url")]
    pub ws_url: String,
    /// JSON file written by the `setup` binary
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_true")]
    pub poll_enabled: bool,
    #[serde(default = "default_true")]
    pub stream_enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default)]
    pub reconnect_strategy: ReconnectStrategy,
    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,
    /// Unset means reconnect forever
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cross_path_dedup: bool,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

/// Shape of `max_config.json`.
#[derive(Debug, Deserialize)]
struct MaxCredentials {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_matrix_homeserver() -> String {
    "https://matrix.example.com".to_string()
}

fn default_matrix_user_id() -> String {
    "@bot:example.com".to_string()
}

fn default_matrix_access_token() -> String {
    PLACEHOLDER_MATRIX_ACCESS_TOKEN.to_string()
}

fn default_matrix_room_id() -> String {
    PLACEHOLDER_MATRIX_ROOM_ID.to_string()
}

fn default_telegram_bot_token() -> String {
    PLACEHOLDER_TELEGRAM_BOT_TOKEN.to_string()
}

fn default_telegram_chat_id() -> String {
    PLACEHOLDER_TELEGRAM_CHAT_ID.to_string()
}

fn default_max_auth_token() -> String {
    PLACEHOLDER_MAX_AUTH_TOKEN.to_string()
}

fn default_max_user_id() -> String {
    PLACEHOLDER_MAX_USER_ID.to_string()
}

fn default_max_api_url() -> String {
    "https://api.max.ru/v1/messages".to_string()
}

fn default_max_ws_url() -> String {
    "wss://max.ru/ws".to_string()
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("max_config.json")
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_poll_limit() -> usize {
    20
}

fn default_error_backoff_secs() -> u64 {
    60
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_reconnect_max_delay_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_dedup_capacity() -> usize {
    1024
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            homeserver: default_matrix_homeserver(),
            user_id: default_matrix_user_id(),
            access_token: default_matrix_access_token(),
            room_id: default_matrix_room_id(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: default_telegram_bot_token(),
            chat_id: default_telegram_chat_id(),
            api_url: None,
        }
    }
}

impl Default for MaxConfig {
    fn default() -> Self {
        Self {
            auth_token: default_max_auth_token(),
            user_id: default_max_user_id(),
            api_url: default_max_api_url(),
            ws_url: default_max_ws_url(),
            credentials_file: default_credentials_file(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_enabled: true,
            stream_enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            poll_limit: default_poll_limit(),
            error_backoff_secs: default_error_backoff_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            reconnect_strategy: ReconnectStrategy::default(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            reconnect_max_attempts: None,
            request_timeout_secs: default_request_timeout_secs(),
            cross_path_dedup: false,
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl MaxConfig {
    /// True when the Max credentials are still the built-in placeholders.
    pub fn needs_auth(&self) -> bool {
        self.auth_token == PLACEHOLDER_MAX_AUTH_TOKEN || self.user_id == PLACEHOLDER_MAX_USER_ID
    }
}

impl Config {
    /// Load configuration: defaults, then the optional TOML file, then the Max
    /// credentials file, then the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        let credentials_file = config.max.credentials_file.clone();
        if credentials_file.exists() {
            let content = std::fs::read_to_string(&credentials_file).with_context(|| {
                format!(
                    "Failed to read Max credentials: {}",
                    credentials_file.display()
                )
            })?;
            config.apply_max_credentials(&content).with_context(|| {
                format!(
                    "Failed to parse Max credentials: {}",
                    credentials_file.display()
                )
            })?;
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML configuration")
    }

    fn apply_max_credentials(&mut self, content: &str) -> Result<()> {
        let credentials: MaxCredentials =
            serde_json::from_str(content).context("Invalid JSON in credentials file")?;
        if let Some(token) = credentials.token.filter(|t| !t.is_empty()) {
            self.max.auth_token = token;
        }
        if let Some(user_id) = credentials.user_id.filter(|u| !u.is_empty()) {
            self.max.user_id = user_id;
        }
        Ok(())
    }

    /// Override fields from environment variables. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MATRIX_HOMESERVER") {
            self.matrix.homeserver = v;
        }
        if let Some(v) = get("MATRIX_USER_ID") {
            self.matrix.user_id = v;
        }
        if let Some(v) = get("MATRIX_ACCESS_TOKEN") {
            self.matrix.access_token = v;
        }
        if let Some(v) = get("MATRIX_ROOM_ID") {
            self.matrix.room_id = v;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = v;
        }
        if let Some(v) = get("MAX_AUTH_TOKEN") {
            self.max.auth_token = v;
        }
        if let Some(v) = get("MAX_USER_ID") {
            self.max.user_id = v;
        }
    }

    /// Environment variable names whose values are still placeholders.
    pub fn placeholder_credentials(&self) -> Vec<&'static str> {
        let checks = [
            (
                "MATRIX_ACCESS_TOKEN",
                self.matrix.access_token == PLACEHOLDER_MATRIX_ACCESS_TOKEN,
            ),
            (
                "MATRIX_ROOM_ID",
                self.matrix.room_id == PLACEHOLDER_MATRIX_ROOM_ID,
            ),
            (
                "TELEGRAM_BOT_TOKEN",
                self.telegram.bot_token == PLACEHOLDER_TELEGRAM_BOT_TOKEN,
            ),
            (
                "TELEGRAM_CHAT_ID",
                self.telegram.chat_id == PLACEHOLDER_TELEGRAM_CHAT_ID,
            ),
            (
                "MAX_AUTH_TOKEN",
                self.max.auth_token == PLACEHOLDER_MAX_AUTH_TOKEN,
            ),
            ("MAX_USER_ID", self.max.user_id == PLACEHOLDER_MAX_USER_ID),
        ];
        checks
            .into_iter()
            .filter(|(_, placeholder)| *placeholder)
            .map(|(name, _)| name)
            .collect()
    }
}
