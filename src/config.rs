//! Session configuration
//!
//! Endpoint validation happens here, before any network action is taken.

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVER_HOST: &str = "10.10.30.172";
pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const DEFAULT_PLAYER_COMMAND: &str = "mpv --no-video --really-quiet";

/// Rejected host/port input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Host cannot be empty")]
    BlankHost,
    #[error("Port must be between 1 and 65535, got {0}")]
    InvalidPort(String),
}

/// Validated server address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::BlankHost);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }
        Ok(Self { host, port })
    }

    /// Validate free-form text input, e.g. from a settings form.
    pub fn parse(host: &str, port: &str) -> Result<Self, ConfigError> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port.trim().to_string()))?;
        Self::new(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Timeouts, retry policy and delays for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// Covers TCP connect plus the WebSocket handshake
    pub connect_timeout: Duration,
    /// Inbound silence tolerated before a liveness ping
    pub read_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Debounce between a new response and auto-play
    pub autoplay_delay: Duration,
    pub audio_retry_delay: Duration,
    /// `None` retries failed playback forever
    pub audio_retry_limit: Option<u32>,
    /// Program and arguments; the asset path is appended
    pub player_command: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: Duration::from_millis(10_000),
            read_timeout: Duration::from_millis(30_000),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(5_000),
            autoplay_delay: Duration::from_millis(500),
            audio_retry_delay: Duration::from_millis(2_000),
            audio_retry_limit: Some(3),
            player_command: split_command(DEFAULT_PLAYER_COMMAND),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let host = lookup("SCHOLAR_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string());
        let port = parse_or("SCHOLAR_PORT", lookup("SCHOLAR_PORT"), DEFAULT_SERVER_PORT);
        let endpoint = Endpoint::new(host, port).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid endpoint in environment, using default");
            Endpoint::default()
        });

        let millis = |key: &str, default: Duration| {
            let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(parse_or(key, lookup(key), fallback))
        };

        let audio_retry_limit = match lookup("SCHOLAR_AUDIO_RETRY_LIMIT") {
            Some(v) if v.trim().eq_ignore_ascii_case("unbounded") => None,
            Some(v) => Some(parse_or(
                "SCHOLAR_AUDIO_RETRY_LIMIT",
                Some(v),
                defaults.audio_retry_limit.unwrap_or(3),
            )),
            None => defaults.audio_retry_limit,
        };

        let player_command = lookup("SCHOLAR_PLAYER")
            .map(|v| split_command(&v))
            .filter(|argv| !argv.is_empty())
            .unwrap_or(defaults.player_command);

        Self {
            endpoint,
            connect_timeout: millis("SCHOLAR_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            read_timeout: millis("SCHOLAR_READ_TIMEOUT_MS", defaults.read_timeout),
            max_reconnect_attempts: parse_or(
                "SCHOLAR_MAX_RECONNECT_ATTEMPTS",
                lookup("SCHOLAR_MAX_RECONNECT_ATTEMPTS"),
                defaults.max_reconnect_attempts,
            ),
            reconnect_delay: millis("SCHOLAR_RECONNECT_DELAY_MS", defaults.reconnect_delay),
            autoplay_delay: millis("SCHOLAR_AUTOPLAY_DELAY_MS", defaults.autoplay_delay),
            audio_retry_delay: millis("SCHOLAR_AUDIO_RETRY_DELAY_MS", defaults.audio_retry_delay),
            audio_retry_limit,
            player_command,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> T {
    let Some(raw) = value else { return default };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = %raw, "Unparseable configuration value, using default");
        default
    })
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
