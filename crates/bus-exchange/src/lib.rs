//! # Bus Exchange
//!
//! The publish/subscribe side of the relay bus.
//!
//! ```text
//!                 enqueue()                     publish(target?)
//!  builder ───────────────→ ┌───────────┐      ┌──────────────────┐
//!                           │   Queue   │      │  PubSub channels │ ──→ listeners
//!  processing ←──── next() ─┤ (one      │      │  (fan-out per    │
//!                           │  consumer)│      │   channel name)  │
//!                           └───────────┘      └──────────────────┘
//! ```
//!
//! Both sides are capability traits ([`PubSub`], [`Queue`]) with in-memory
//! defaults built on `tokio::sync` channels. The [`Exchange`] facade lets
//! either backend be swapped while the bus is running.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod exchange;
pub mod pubsub;
pub mod queue;

pub use config::ExchangeConfig;
pub use exchange::{Channel, Exchange, Route};
pub use pubsub::{ChannelSubscription, MemoryPubSub, PubSub, Received};
pub use queue::{MemoryQueue, Queue};

use thiserror::Error;

/// Messages to buffer per channel listener before it lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Errors from exchange backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// The queue no longer accepts envelopes.
    #[error("queue closed")]
    QueueClosed,

    /// A channel was closed underneath its listener.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Failure inside a non-memory backend.
    #[error("exchange backend error: {0}")]
    Backend(String),

    #[error("invalid exchange configuration: {0}")]
    InvalidConfig(String),
}
