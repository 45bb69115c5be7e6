use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the REST API (fallback path)
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base URL of the streaming endpoint
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Bearer token issued by the platform's login flow
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Interval between keepalive pings in milliseconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
    /// Declare the connection dead if nothing arrives for this long
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_ms: u64,
    /// Give up on an open attempt whose handshake has not completed
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound (exclusive) of the uniform jitter added to each delay
    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Room joined by the command-line client
    pub room_id: Option<i64>,
    /// Number of messages loaded when a room is opened
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_api_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:9000".to_string()
}

fn default_ping_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_liveness_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_jitter() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_history_limit() -> u32 {
    50
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.api_url", default_api_url())?
            .set_default("server.ws_url", default_ws_url())?
            .set_default("websocket.ping_interval_ms", default_ping_interval() as i64)?
            .set_default("websocket.liveness_timeout_ms", default_liveness_timeout() as i64)?
            .set_default("websocket.connect_timeout_ms", default_connect_timeout() as i64)?
            .set_default("reconnect.max_attempts", default_max_attempts() as i64)?
            .set_default("reconnect.base_delay_ms", default_base_delay() as i64)?
            .set_default("reconnect.multiplier", default_multiplier())?
            .set_default("reconnect.max_jitter_ms", default_max_jitter() as i64)?
            .set_default("reconnect.max_delay_ms", default_max_delay() as i64)?
            .set_default("chat.history_limit", default_history_limit() as i64)?
            .set_default("log.format", default_log_format())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // CHAT__SERVER__WS_URL, CHAT__AUTH__TOKEN, CHAT__CHAT__ROOM_ID, etc.
            .add_source(
                Environment::with_prefix("CHAT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            liveness_timeout_ms: default_liveness_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
            max_jitter_ms: default_max_jitter(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            room_id: None,
            history_limit: default_history_limit(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            websocket: WebSocketConfig::default(),
            reconnect: ReconnectConfig::default(),
            chat: ChatConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.api_url, "http://localhost:9000");
        assert_eq!(server.ws_url, "ws://localhost:9000");
    }

    #[test]
    fn test_keepalive_defaults() {
        let ws = WebSocketConfig::default();
        assert_eq!(ws.ping_interval(), Duration::from_secs(15));
        assert_eq!(ws.liveness_timeout(), Duration::from_secs(30));
        assert_eq!(ws.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_reconnect_policy_defaults() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.max_attempts, 10);
        assert_eq!(reconnect.base_delay_ms, 1_000);
        assert_eq!(reconnect.multiplier, 1.5);
        assert_eq!(reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn test_deserialize_partial_settings() {
        let settings: Settings = Config::builder()
            .set_override("auth.token", "abc")
            .unwrap()
            .set_override("chat.room_id", 7)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.auth.token.as_deref(), Some("abc"));
        assert_eq!(settings.chat.room_id, Some(7));
        assert_eq!(settings.chat.history_limit, 50);
        assert_eq!(settings.websocket.ping_interval_ms, 15_000);
    }
}
