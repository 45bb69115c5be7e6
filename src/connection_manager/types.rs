//! Connection state and related types

use std::fmt;
use std::time::Duration;

use crate::chat::RoomId;
use crate::config::Settings;

use super::backoff::BackoffConfig;

/// Ready state of the streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable view of the session, published after every state change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub room_id: Option<RoomId>,
    pub reconnect_attempts: u32,
    pub reconnect_scheduled: bool,
}

/// Payload of disconnect events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    pub room_id: Option<RoomId>,
    pub code: u16,
    pub reason: String,
}

/// Connection manager tuning
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base URL of the streaming endpoint, e.g. `ws://localhost:9000`
    pub ws_url: String,
    pub ping_interval: Duration,
    pub liveness_timeout: Duration,
    /// Upper bound on a single open attempt, handshake included
    pub connect_timeout: Duration,
    /// How long a locally closed socket may wait for the peer's close frame
    pub close_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl ManagerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ws_url: settings.server.ws_url.clone(),
            ping_interval: settings.websocket.ping_interval(),
            liveness_timeout: settings.websocket.liveness_timeout(),
            connect_timeout: settings.websocket.connect_timeout(),
            close_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::from(&settings.reconnect),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
