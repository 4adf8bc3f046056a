//! # Exchange
//!
//! Facade over a pub/sub backend and a queue backend. Either backend can be
//! swapped at runtime; callers always see the current one. Queue swaps are
//! announced through [`Exchange::watch_queue`] so a parked consumer can move
//! to the new queue.
//!
//! ## Addressing
//!
//! `publish(envelope, target)` delivers on `target` when given (unicast),
//! otherwise on the envelope's `actor` channel (broadcast to everyone
//! following that actor).

use bus_types::Envelope;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::config::ExchangeConfig;
use crate::pubsub::{ChannelSubscription, MemoryPubSub, PubSub};
use crate::queue::{MemoryQueue, Queue};
use crate::ExchangeError;

/// Routing decision for one channel publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Point-to-point delivery on an explicit target channel.
    Unicast(String),
    /// Delivery on the sender's own actor channel.
    Broadcast(String),
}

impl Route {
    /// Route an envelope, honouring an explicit target override.
    pub fn resolve(envelope: &Envelope, target: Option<&str>) -> Self {
        match target {
            Some(target) => Route::Unicast(target.to_string()),
            None => Route::Broadcast(envelope.actor.clone()),
        }
    }

    /// Channel name the route publishes on.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Route::Unicast(channel) | Route::Broadcast(channel) => channel,
        }
    }
}

/// A named channel handle.
pub struct Channel {
    name: String,
    pubsub: Arc<dyn PubSub>,
}

impl Channel {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> ChannelSubscription {
        self.pubsub.subscribe(&self.name)
    }

    pub fn publish(&self, envelope: Envelope) -> usize {
        self.pubsub.publish(&self.name, envelope)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.pubsub.listener_count(&self.name)
    }
}

/// Pub/sub channels plus the processing queue.
pub struct Exchange {
    pubsub: RwLock<Arc<dyn PubSub>>,
    queue: RwLock<Arc<dyn Queue>>,
    queue_version: watch::Sender<u64>,
}

impl Exchange {
    /// In-memory exchange with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&ExchangeConfig::default())
    }

    /// In-memory exchange sized from configuration.
    #[must_use]
    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::with_backends(
            Arc::new(MemoryPubSub::with_capacity(config.channel_capacity)),
            Arc::new(MemoryQueue::new()),
        )
    }

    /// Exchange over caller-provided backends.
    pub fn with_backends(pubsub: Arc<dyn PubSub>, queue: Arc<dyn Queue>) -> Self {
        Self {
            pubsub: RwLock::new(pubsub),
            queue: RwLock::new(queue),
            queue_version: watch::channel(0).0,
        }
    }

    /// Current pub/sub backend.
    pub fn pubsub(&self) -> Arc<dyn PubSub> {
        self.pubsub.read().clone()
    }

    /// Replace the pub/sub backend. Existing listeners stay on the old one;
    /// `bus_server::Server::set_pubsub` moves its forwarders across.
    pub fn set_pubsub(&self, pubsub: Arc<dyn PubSub>) {
        *self.pubsub.write() = pubsub;
    }

    /// Current queue backend.
    pub fn queue(&self) -> Arc<dyn Queue> {
        self.queue.read().clone()
    }

    /// Replace the queue backend and notify every [`Exchange::watch_queue`]
    /// receiver.
    pub fn set_queue(&self, queue: Arc<dyn Queue>) {
        *self.queue.write() = queue;
        self.queue_version.send_modify(|version| *version += 1);
        debug!(version = *self.queue_version.borrow(), "Queue backend replaced");
    }

    /// Changes whenever the queue backend is replaced.
    ///
    /// Subscribe before reading [`Exchange::queue`] so no swap is missed.
    pub fn watch_queue(&self) -> watch::Receiver<u64> {
        self.queue_version.subscribe()
    }

    /// Handle on a named channel.
    pub fn channel(&self, name: impl Into<String>) -> Channel {
        Channel {
            name: name.into(),
            pubsub: self.pubsub(),
        }
    }

    /// Attach a listener to a channel.
    pub fn subscribe(&self, channel: &str) -> ChannelSubscription {
        self.pubsub().subscribe(channel)
    }

    /// Publish on `target` if given, else on the envelope's actor channel.
    ///
    /// # Returns
    ///
    /// The number of listeners reached.
    pub fn publish(&self, envelope: Envelope, target: Option<&str>) -> usize {
        let route = Route::resolve(&envelope, target);
        debug!(
            message_id = %envelope.id,
            action = %envelope.action,
            route = ?route,
            "Publishing on channel"
        );
        self.pubsub().publish(route.channel(), envelope)
    }

    /// Hand an envelope to the processing queue.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), ExchangeError> {
        self.queue().enqueue(envelope)
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}
