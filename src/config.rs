//! Client configuration parsed from environment variables.
//!
//! All keys are optional; unset keys fall back to the `DEFAULT_*` constants.
//! A set-but-unparseable value is an error rather than a silent default.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorCode;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_MS: u64 = 200;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;
pub const DEFAULT_TOPIC_PREFIX: &str = "/topic/conversations/";
pub const DEFAULT_SEND_DESTINATION: &str = "/app/chat.sendMessage";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

/// Defaults applied by the request client when a call does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestConfig {
    /// Per-attempt deadline.
    pub timeout: Duration,
    /// Transient-failure retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles on each further retry.
    pub retry_base: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
        }
    }
}

/// Tuning for the realtime connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Fixed delay between connection attempts.
    pub reconnect_delay: Duration,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// How long to wait for `CONNECTED` after sending `CONNECT`.
    pub handshake_timeout: Duration,
    /// Outgoing heartbeat offered to the broker; zero disables heartbeats.
    pub heartbeat: Duration,
    /// Inbound address prefix; the conversation id is appended.
    pub topic_prefix: String,
    /// Fixed outbound `SEND` destination for chat messages.
    pub send_destination: String,
    /// Per-topic buffer before slow receivers start lagging.
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_reconnect_attempts: None,
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            heartbeat: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_owned(),
            send_destination: DEFAULT_SEND_DESTINATION.to_owned(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// HTTP base URL without trailing slash.
    pub api_base: String,
    /// Realtime endpoint path appended to `api_base`.
    pub ws_path: String,
    /// Wrap the websocket in SockJS framing.
    pub sockjs: bool,
    pub request: RequestConfig,
    pub realtime: RealtimeConfig,
    /// Where the session is persisted; `None` keeps it in memory.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_owned(),
            ws_path: DEFAULT_WS_PATH.to_owned(),
            sockjs: true,
            request: RequestConfig::default(),
            realtime: RealtimeConfig::default(),
            session_file: None,
        }
    }
}

impl ClientConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `AGORA_API_BASE`: default `http://localhost:8080`
    /// - `AGORA_WS_PATH`: default `/ws`
    /// - `AGORA_SOCKJS`: `true` (default) or `false`
    /// - `AGORA_REQUEST_TIMEOUT_MS`: default 15000
    /// - `AGORA_MAX_RETRIES`: default 2
    /// - `AGORA_RETRY_BASE_MS`: default 200
    /// - `AGORA_RECONNECT_DELAY_MS`: default 5000
    /// - `AGORA_MAX_RECONNECT_ATTEMPTS`: unset retries forever
    /// - `AGORA_HANDSHAKE_TIMEOUT_MS`: default 10000
    /// - `AGORA_HEARTBEAT_MS`: default 10000, 0 disables
    /// - `AGORA_SESSION_FILE`: persisted session path
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a set variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] but reads keys through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a present value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base = lookup("AGORA_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_owned())
            .trim_end_matches('/')
            .to_owned();
        let ws_path = lookup("AGORA_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_owned());
        let sockjs = parse_bool(&lookup, "AGORA_SOCKJS", true)?;

        let request = RequestConfig {
            timeout: parse_millis(&lookup, "AGORA_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
            max_retries: parse_or(&lookup, "AGORA_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_base: parse_millis(&lookup, "AGORA_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)?,
        };

        let max_reconnect_attempts = match lookup("AGORA_MAX_RECONNECT_ATTEMPTS") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| ConfigError::Invalid { key: "AGORA_MAX_RECONNECT_ATTEMPTS", value: raw })?,
            ),
            None => None,
        };
        let realtime = RealtimeConfig {
            reconnect_delay: parse_millis(&lookup, "AGORA_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?,
            max_reconnect_attempts,
            handshake_timeout: parse_millis(&lookup, "AGORA_HANDSHAKE_TIMEOUT_MS", DEFAULT_HANDSHAKE_TIMEOUT_MS)?,
            heartbeat: parse_millis(&lookup, "AGORA_HEARTBEAT_MS", DEFAULT_HEARTBEAT_MS)?,
            ..RealtimeConfig::default()
        };

        let session_file = lookup("AGORA_SESSION_FILE")
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self { api_base, ws_path, sockjs, request, realtime, session_file })
    }

    /// HTTP URL of the realtime endpoint, e.g. `http://localhost:8080/ws`.
    #[must_use]
    pub fn realtime_url(&self) -> String {
        if self.ws_path.starts_with('/') {
            format!("{}{}", self.api_base, self.ws_path)
        } else {
            format!("{}/{}", self.api_base, self.ws_path)
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default).map(Duration::from_millis)
}

fn parse_bool<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid { key, value: other.to_owned() }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
