//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_FAILED, CONNECTIONS_OPENED, CONNECTION_OPEN, FALLBACK_SENDS, FORCED_RECONNECTS,
    FRAMES_RECEIVED, FRAMES_SENT, RECONNECTS_EXHAUSTED, RECONNECTS_SCHEDULED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
        CONNECTION_OPEN.set(1);
    }

    pub fn record_open_failed() {
        CONNECTIONS_FAILED.inc();
    }

    pub fn record_closed() {
        CONNECTION_OPEN.set(0);
    }
}

/// Helper struct for recording frame metrics
pub struct FrameMetrics;

impl FrameMetrics {
    pub fn record_message() {
        FRAMES_RECEIVED.with_label_values(&["message"]).inc();
    }

    pub fn record_pong() {
        FRAMES_RECEIVED.with_label_values(&["pong"]).inc();
    }

    pub fn record_malformed() {
        FRAMES_RECEIVED.with_label_values(&["malformed"]).inc();
    }

    pub fn record_ping_sent() {
        FRAMES_SENT.with_label_values(&["ping"]).inc();
    }

    pub fn record_chat_sent() {
        FRAMES_SENT.with_label_values(&["chat"]).inc();
    }
}

/// Helper struct for recording reconnect metrics
pub struct RecoveryMetrics;

impl RecoveryMetrics {
    pub fn record_scheduled() {
        RECONNECTS_SCHEDULED.inc();
    }

    pub fn record_forced() {
        FORCED_RECONNECTS.inc();
    }

    pub fn record_exhausted() {
        RECONNECTS_EXHAUSTED.inc();
    }
}

/// Helper struct for recording fallback metrics
pub struct FallbackMetrics;

impl FallbackMetrics {
    pub fn record_stored() {
        FALLBACK_SENDS.with_label_values(&["stored"]).inc();
    }

    pub fn record_failed() {
        FALLBACK_SENDS.with_label_values(&["failed"]).inc();
    }
}
