mod settings;

pub use settings::{
    AuthConfig, ChatConfig, LogConfig, ReconnectConfig, ServerConfig, Settings, WebSocketConfig,
};
