//! Prometheus metrics for the chat transport.
//!
//! - Connection metrics (opens, failed opens, current state)
//! - Frame metrics (received, malformed, sent)
//! - Recovery metrics (backoff reconnects, forced reconnects, exhausted sessions)
//! - Fallback metrics (messages persisted over the REST path)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, FallbackMetrics, FrameMetrics, RecoveryMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "chat_relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections that completed the handshake
    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total streaming connections opened"
    ).unwrap();

    /// Connection attempts rejected before the handshake completed
    pub static ref CONNECTIONS_FAILED: IntCounter = register_int_counter!(
        format!("{}_connections_failed_total", METRIC_PREFIX),
        "Total streaming connection attempts that failed to open"
    ).unwrap();

    /// Whether the stream is open (1) or not (0)
    pub static ref CONNECTION_OPEN: IntGauge = register_int_gauge!(
        format!("{}_connection_open", METRIC_PREFIX),
        "Streaming connection status (1=open, 0=not open)"
    ).unwrap();

    // ============================================================================
    // Frame Metrics
    // ============================================================================

    /// Inbound frames by kind
    pub static ref FRAMES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total inbound frames",
        &["kind"]
    ).unwrap();

    /// Outbound frames by kind
    pub static ref FRAMES_SENT: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_sent_total", METRIC_PREFIX),
        "Total outbound frames",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Recovery Metrics
    // ============================================================================

    /// Backoff-scheduled reconnect attempts
    pub static ref RECONNECTS_SCHEDULED: IntCounter = register_int_counter!(
        format!("{}_reconnects_scheduled_total", METRIC_PREFIX),
        "Total backoff reconnect attempts scheduled"
    ).unwrap();

    /// Immediate reconnects after the liveness timer expired or a send failed
    pub static ref FORCED_RECONNECTS: IntCounter = register_int_counter!(
        format!("{}_forced_reconnects_total", METRIC_PREFIX),
        "Total forced reconnects"
    ).unwrap();

    /// Sessions abandoned after exhausting reconnect attempts
    pub static ref RECONNECTS_EXHAUSTED: IntCounter = register_int_counter!(
        format!("{}_reconnects_exhausted_total", METRIC_PREFIX),
        "Total sessions that ran out of reconnect attempts"
    ).unwrap();

    // ============================================================================
    // Fallback Metrics
    // ============================================================================

    /// Messages sent through the request/response path, by outcome
    pub static ref FALLBACK_SENDS: IntCounterVec = register_int_counter_vec!(
        format!("{}_fallback_sends_total", METRIC_PREFIX),
        "Total messages sent over the REST fallback",
        &["outcome"]
    ).unwrap();
}
