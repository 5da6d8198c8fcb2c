//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream realtime session settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// How the broker mints sessions upstream.
#[derive(Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Upstream API key. Requests fail with a 500 while unset.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the upstream API, without the `/v1` suffix.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    /// System instructions attached to every session.
    #[serde(default = "default_instructions")]
    pub instructions: String,

    /// Timeout for the upstream request, in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o-realtime-preview-2024-12-17".to_string()
}

fn default_voice() -> String {
    "verse".to_string()
}

fn default_instructions() -> String {
    "You are a helpful, concise voice assistant for phone-like conversations. \
     Keep responses short."
        .to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            voice: default_voice(),
            instructions: default_instructions(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

impl RealtimeConfig {
    /// The configured API key, treating a blank value as unset.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    /// Full URL of the upstream session-minting endpoint.
    pub fn sessions_url(&self) -> String {
        format!(
            "{}/v1/realtime/sessions",
            self.api_base.trim_end_matches('/')
        )
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("instructions", &self.instructions)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .finish()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `OPENAI_API_KEY` overrides `realtime.api_key`
/// - `OPENAI_API_BASE` overrides `realtime.api_base`
/// - `OPENAI_REALTIME_MODEL` overrides `realtime.model`
/// - `OPENAI_REALTIME_VOICE` overrides `realtime.voice`
/// - `AGENT_INSTRUCTIONS` overrides `realtime.instructions`
/// - `PARLEY_UPSTREAM_TIMEOUT_SECS` overrides `realtime.upstream_timeout_secs`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if let Some(key) = var("OPENAI_API_KEY") {
        config.realtime.api_key = Some(key);
    }
    if let Some(base) = var("OPENAI_API_BASE") {
        config.realtime.api_base = base;
    }
    if let Some(model) = var("OPENAI_REALTIME_MODEL").filter(|v| !v.trim().is_empty()) {
        config.realtime.model = model;
    }
    if let Some(voice) = var("OPENAI_REALTIME_VOICE").filter(|v| !v.trim().is_empty()) {
        config.realtime.voice = voice;
    }
    if let Some(instructions) = var("AGENT_INSTRUCTIONS").filter(|v| !v.trim().is_empty()) {
        config.realtime.instructions = instructions;
    }
    if let Some(secs) = var("PARLEY_UPSTREAM_TIMEOUT_SECS") {
        if let Ok(parsed) = secs.parse() {
            config.realtime.upstream_timeout_secs = parsed;
        }
    }
}
