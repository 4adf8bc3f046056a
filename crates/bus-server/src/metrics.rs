//! Bus counters.
//!
//! Plain atomics, read as a [`MetricsSnapshot`] for the gateway's
//! `/metrics` endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::Stage;

/// Relay bus metrics
#[derive(Debug, Default)]
pub struct BusMetrics {
    // Connection counters
    pub connections_active: AtomicU64,
    pub connections_total: AtomicU64,
    pub subscriptions_active: AtomicU64,

    // Inbound
    pub frames_received: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub inbound_received: AtomicU64,
    pub inbound_failed: AtomicU64,

    // Processing
    pub messages_queued: AtomicU64,
    pub processing_received: AtomicU64,
    pub processing_failed: AtomicU64,
    pub messages_consumed: AtomicU64,

    // Channels
    pub channel_publications: AtomicU64,

    // Outbound
    pub outbound_received: AtomicU64,
    pub outbound_failed: AtomicU64,
    pub deliveries: AtomicU64,
    pub deliveries_dropped: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        // Saturating: a disconnect for an unknown connection must not wrap.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_subscribe(&self) {
        self.subscriptions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsubscribe(&self, count: u64) {
        let _ = self
            .subscriptions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(count))
            });
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pipeline run
    pub fn record_stage(&self, stage: Stage, success: bool) {
        let counter = match (stage, success) {
            (Stage::Inbound, true) => &self.inbound_received,
            (Stage::Inbound, false) => &self.inbound_failed,
            (Stage::Processing, true) => &self.processing_received,
            (Stage::Processing, false) => &self.processing_failed,
            (Stage::Outbound, true) => &self.outbound_received,
            (Stage::Outbound, false) => &self.outbound_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_consumed(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publication(&self) {
        self.channel_publications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, success: bool) {
        if success {
            self.deliveries.fetch_add(1, Ordering::Relaxed);
        } else {
            self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count messages a listener lost without ever seeing them.
    pub fn record_dropped(&self, count: u64) {
        self.deliveries_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            connections_active: load(&self.connections_active),
            connections_total: load(&self.connections_total),
            subscriptions_active: load(&self.subscriptions_active),
            frames_received: load(&self.frames_received),
            frames_rejected: load(&self.frames_rejected),
            inbound_received: load(&self.inbound_received),
            inbound_failed: load(&self.inbound_failed),
            messages_queued: load(&self.messages_queued),
            processing_received: load(&self.processing_received),
            processing_failed: load(&self.processing_failed),
            messages_consumed: load(&self.messages_consumed),
            channel_publications: load(&self.channel_publications),
            outbound_received: load(&self.outbound_received),
            outbound_failed: load(&self.outbound_failed),
            deliveries: load(&self.deliveries),
            deliveries_dropped: load(&self.deliveries_dropped),
        }
    }
}

/// Point-in-time copy of [`BusMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_active: u64,
    pub connections_total: u64,
    pub subscriptions_active: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub inbound_received: u64,
    pub inbound_failed: u64,
    pub messages_queued: u64,
    pub processing_received: u64,
    pub processing_failed: u64,
    pub messages_consumed: u64,
    pub channel_publications: u64,
    pub outbound_received: u64,
    pub outbound_failed: u64,
    pub deliveries: u64,
    pub deliveries_dropped: u64,
}
