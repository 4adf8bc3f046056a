//! # Processing Queue
//!
//! A sequential stream of published envelopes waiting for the processing
//! stage. Unlike channels, every queued envelope is handed to exactly one
//! consumer.

use async_trait::async_trait;
use bus_types::Envelope;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::ExchangeError;

/// Capability interface for a queue backend.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append an envelope.
    fn enqueue(&self, envelope: Envelope) -> Result<(), ExchangeError>;

    /// Wait for the next envelope. `None` means the queue is gone for good.
    async fn next(&self) -> Option<Envelope>;

    /// Envelopes waiting to be consumed.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new envelopes.
    fn close(&self) {}
}

/// In-memory queue on an unbounded `tokio::sync::mpsc` channel.
pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    depth: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether [`Queue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn enqueue(&self, envelope: Envelope) -> Result<(), ExchangeError> {
        if self.is_closed() {
            return Err(ExchangeError::QueueClosed);
        }

        let message_id = envelope.id;
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(envelope).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(ExchangeError::QueueClosed);
        }

        debug!(message_id = %message_id, depth = self.len(), "Envelope queued");
        Ok(())
    }

    async fn next(&self) -> Option<Envelope> {
        let mut receiver = self.receiver.lock().await;
        let envelope = receiver.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(envelope)
    }

    fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
