//! Gateway counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// WebSocket transport metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub websocket_connections: AtomicU64,
    pub websocket_messages_received: AtomicU64,
    pub websocket_messages_sent: AtomicU64,
    pub rate_limit_rejected: AtomicU64,
    pub oversized_rejected: AtomicU64,
    pub malformed_rejected: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record WebSocket connection
    pub fn record_ws_connect(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record WebSocket disconnection
    pub fn record_ws_disconnect(&self) {
        self.websocket_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_ws_received(&self) {
        self.websocket_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record WebSocket message sent
    pub fn record_ws_message(&self) {
        self.websocket_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rate limit rejection
    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oversized(&self) {
        self.oversized_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            websocket_connections: self.websocket_connections.load(Ordering::Relaxed),
            websocket_messages_received: self.websocket_messages_received.load(Ordering::Relaxed),
            websocket_messages_sent: self.websocket_messages_sent.load(Ordering::Relaxed),
            rate_limit_rejected: self.rate_limit_rejected.load(Ordering::Relaxed),
            oversized_rejected: self.oversized_rejected.load(Ordering::Relaxed),
            malformed_rejected: self.malformed_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GatewayMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayMetricsSnapshot {
    pub websocket_connections: u64,
    pub websocket_messages_received: u64,
    pub websocket_messages_sent: u64,
    pub rate_limit_rejected: u64,
    pub oversized_rejected: u64,
    pub malformed_rejected: u64,
}
