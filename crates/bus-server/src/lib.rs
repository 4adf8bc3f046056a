//! # Bus Server
//!
//! The routing core of the relay bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  frame   ┌─────────┐   ┌─────────┐   ┌─────────┐
//! │ Connection │ ───────→ │ Parser  │ → │ Inbound │ → │ Builder │ ─→ queue
//! └────────────┘          └─────────┘   └─────────┘   └─────────┘
//!       ↑                                                  │
//!       │ emit   ┌──────────┐   channel   ┌────────────┐   │
//!       └─────── │ Outbound │ ←────────── │ Processing │ ←─┘
//!                └──────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_server::{from_fn, BusError, Connection, Message, Server};
//!
//! let server = Server::new()?;
//! server.on("shout", from_fn(|message: &mut Message, _: Option<&Connection>| {
//!     let loud = format!("{}!", message.content()[0].as_str().unwrap_or_default());
//!     message.respond(loud);
//!     Ok::<_, BusError>(())
//! }));
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod builder;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod server;
pub mod subscriptions;

pub use builder::{MessageBuilder, PublishSink};
pub use config::ServerConfig;
pub use connection::{Connection, Handshake, WeakConnection, DEFAULT_OUTBOX_SIZE};
pub use error::{BusError, ConnectionError, ErrorHandler, ErrorReport, ErrorSource, LogErrors};
pub use message::{Disposition, Message};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use parser::{actor_fn, target_fn, ActorResolver, MessageParser, TargetResolver};
pub use pipeline::{from_fn, Middleware, Pipeline, Stage};
pub use server::{ConnectionHook, Publication, Server, ServerBuilder};
pub use subscriptions::{LinkKind, SubscriptionRegistry};

pub use bus_exchange::{Exchange, ExchangeConfig, ExchangeError};
pub use bus_types::{ConnectionId, Envelope, InboundFrame, MessageId, Value, WireEvent};
