//! # Publish/Subscribe Channels
//!
//! Named channels with any number of listeners. A message published to a
//! channel reaches every listener subscribed at that moment; publishing to a
//! channel nobody listens on is a silent no-op.

use bus_types::Envelope;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{ExchangeError, DEFAULT_CHANNEL_CAPACITY};

/// Capability interface for a pub/sub backend.
pub trait PubSub: Send + Sync {
    /// Publish an envelope on a channel.
    ///
    /// # Returns
    ///
    /// The number of listeners that received it (0 when nobody listens).
    fn publish(&self, channel: &str, envelope: Envelope) -> usize;

    /// Attach a listener to a channel. Dropping the handle detaches it.
    fn subscribe(&self, channel: &str) -> ChannelSubscription;

    /// Number of listeners currently attached to a channel.
    fn listener_count(&self, channel: &str) -> usize;

    /// Number of channels with at least one listener.
    fn channel_count(&self) -> usize;
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// One event seen by a channel listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(Envelope),
    /// This many messages were overwritten before the listener read them.
    Lagged(u64),
}

/// A listener handle on one channel.
///
/// When dropped, the listener is detached and the backend may release the
/// channel if it was the last one.
pub struct ChannelSubscription {
    channel: String,
    receiver: Option<broadcast::Receiver<Envelope>>,
    on_drop: Option<Cleanup>,
}

impl ChannelSubscription {
    /// Wrap a broadcast receiver. `on_drop` runs after the receiver is released.
    pub fn new(
        channel: impl Into<String>,
        receiver: broadcast::Receiver<Envelope>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            receiver: Some(receiver),
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Channel name this handle listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next message on the channel, skipping over any lag.
    ///
    /// # Returns
    ///
    /// - `Some(envelope)` - The next message
    /// - `None` - The channel was closed
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.recv_event().await? {
                Received::Message(envelope) => return Some(envelope),
                Received::Lagged(skipped) => {
                    debug!(channel = %self.channel, lagged = skipped, "Listener lagged, messages dropped");
                }
            }
        }
    }

    /// Receive the next message, or learn how many were lost to lag.
    ///
    /// A listener that falls more than the channel capacity behind loses the
    /// oldest messages; the next call reports how many before resuming with
    /// the oldest one still buffered.
    pub async fn recv_event(&mut self) -> Option<Received> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(envelope) => Some(Received::Message(envelope)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(Received::Lagged(skipped)),
        }
    }

    /// Receive without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(envelope))` - A message was available
    /// - `Ok(None)` - Nothing available right now
    /// - `Err(ExchangeError::ChannelClosed)` - The channel was closed
    pub fn try_recv(&mut self) -> Result<Option<Envelope>, ExchangeError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(ExchangeError::ChannelClosed(self.channel.clone()));
        };
        loop {
            match receiver.try_recv() {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(ExchangeError::ChannelClosed(self.channel.clone()))
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            }
        }
    }
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        if let Some(cleanup) = self.on_drop.take() {
            cleanup();
        }
        debug!(channel = %self.channel, "Channel listener detached");
    }
}

/// In-memory pub/sub backend.
///
/// One `tokio::sync::broadcast` channel per name, created on first subscribe
/// and removed when its last listener detaches.
pub struct MemoryPubSub {
    channels: Arc<DashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
}

impl MemoryPubSub {
    /// Create a backend with the default per-channel buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a backend buffering up to `capacity` messages per listener.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Per-channel buffer size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub for MemoryPubSub {
    fn publish(&self, channel: &str, envelope: Envelope) -> usize {
        let Some(sender) = self.channels.get(channel).map(|s| s.clone()) else {
            debug!(channel = %channel, message_id = %envelope.id, "No listeners on channel");
            return 0;
        };

        match sender.send(envelope) {
            Ok(receivers) => {
                debug!(channel = %channel, receivers = receivers, "Message published");
                receivers
            }
            Err(_) => {
                debug!(channel = %channel, "Listeners detached before delivery");
                0
            }
        }
    }

    fn subscribe(&self, channel: &str) -> ChannelSubscription {
        let capacity = self.capacity;
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();

        debug!(channel = %channel, "Channel listener attached");

        let channels = Arc::clone(&self.channels);
        let name = channel.to_string();
        ChannelSubscription::new(channel, receiver, move || {
            channels.remove_if(&name, |_, sender| sender.receiver_count() == 0);
        })
    }

    fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
