// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Transport and connection lifecycle
pub mod connection_manager;
pub mod websocket;

// Chat surface
pub mod api;
pub mod chat;
