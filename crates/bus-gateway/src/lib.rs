//! # Bus Gateway
//!
//! WebSocket transport for the relay bus.
//!
//! ## Wire Format
//!
//! Client to server, one JSON array per message:
//!
//! ```text
//! ["shout", "hello", "zion"]
//! ```
//!
//! Server to client:
//!
//! ```text
//! ["shout", "zion", "Hello!!!!!!", "zion", "2024-01-01T00:00:00+00:00"]
//! [action,  actor,  ...content,    target, created]
//! ```
//!
//! Transport errors (oversized frames, rate limiting, malformed JSON) are
//! answered with `["error", reason]`.

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod service;

pub use config::{GatewayConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_RATE_LIMIT};
pub use error::GatewayError;
pub use handler::{WebSocketHandler, ERROR_EVENT};
pub use metrics::{GatewayMetrics, GatewayMetricsSnapshot};
pub use service::{AppState, GatewayService};
