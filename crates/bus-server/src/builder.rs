//! One-shot message builder.
//!
//! A builder holds a finished envelope until [`MessageBuilder::deliver`] is
//! called, then hands it to its [`PublishSink`]. Only the first call does
//! anything; the envelope is moved out, so a second publish is impossible.

use bus_types::Envelope;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Receives envelopes from builders.
pub trait PublishSink: Send + Sync {
    fn publish(&self, envelope: Envelope);
}

impl<F> PublishSink for F
where
    F: Fn(Envelope) + Send + Sync,
{
    fn publish(&self, envelope: Envelope) {
        self(envelope)
    }
}

/// Wraps an envelope and publishes it at most once.
pub struct MessageBuilder {
    envelope: Mutex<Option<Envelope>>,
    sink: Arc<dyn PublishSink>,
}

impl MessageBuilder {
    pub fn new(envelope: Envelope, sink: Arc<dyn PublishSink>) -> Self {
        Self {
            envelope: Mutex::new(Some(envelope)),
            sink,
        }
    }

    /// Publish the envelope.
    ///
    /// Returns `false` if it was already delivered.
    pub fn deliver(&self) -> bool {
        let Some(envelope) = self.envelope.lock().take() else {
            debug!("Builder already delivered");
            return false;
        };
        debug!(message_id = %envelope.id, action = %envelope.action, "Message built");
        self.sink.publish(envelope);
        true
    }

    pub fn is_built(&self) -> bool {
        self.envelope.lock().is_none()
    }

    /// Copy of the pending envelope, if not yet delivered.
    pub fn envelope(&self) -> Option<Envelope> {
        self.envelope.lock().clone()
    }
}

impl std::fmt::Debug for MessageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuilder")
            .field("built", &self.is_built())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_deliver_publishes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = {
            let calls = Arc::clone(&calls);
            move |_: Envelope| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };
        let builder = MessageBuilder::new(Envelope::new("shout", "alice", vec![]), Arc::new(sink));

        assert!(!builder.is_built());
        assert!(builder.envelope().is_some());
        assert!(builder.deliver());
        assert!(!builder.deliver());
        assert!(builder.is_built());
        assert!(builder.envelope().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_deliver_publishes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = {
            let calls = Arc::clone(&calls);
            move |_: Envelope| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };
        let builder = Arc::new(MessageBuilder::new(
            Envelope::new("shout", "alice", vec![]),
            Arc::new(sink),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let builder = Arc::clone(&builder);
                std::thread::spawn(move || builder.deliver())
            })
            .collect();
        let delivered = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| *d)
            .count();

        assert_eq!(delivered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
