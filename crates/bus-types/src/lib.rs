//! # Bus Types
//!
//! Types shared by every crate of the relay bus.
//!
//! ## Contents
//!
//! - [`Envelope`]: the canonical message with its one-shot `published` stamp
//! - [`MessageId`] / [`ConnectionId`]: time-ordered identifiers
//! - [`InboundFrame`] / [`WireEvent`]: the client-facing positional wire format

pub mod envelope;
pub mod ids;
pub mod wire;

pub use envelope::Envelope;
pub use ids::{ConnectionId, MessageId};
pub use wire::{FrameError, InboundFrame, WireEvent};

/// Re-exported so downstream crates agree on the content value type.
pub use serde_json::Value;
