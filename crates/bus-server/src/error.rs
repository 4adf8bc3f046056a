//! Error types and the shared error sink.
//!
//! Every failure on the bus (a middleware rejecting a message, a frame that
//! cannot be parsed, a delivery to a closed connection) is wrapped in an
//! [`ErrorReport`] and handed to one [`ErrorHandler`]. None of them are fatal.

use bus_exchange::ExchangeError;
use bus_types::{ConnectionId, FrameError, MessageId};
use std::fmt;
use thiserror::Error;
use tracing::error;

use crate::pipeline::Stage;

/// Failures emitting to a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection was disconnected.
    #[error("connection closed")]
    Closed,

    /// The connection's outbox is full; the event was dropped.
    #[error("connection outbox saturated")]
    Saturated,
}

/// Errors raised while routing a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A middleware refused the message.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The action was never registered with the parser.
    #[error("unrecognized action: {0}")]
    UnrecognizedAction(String),

    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// The actor resolver could not name the sender.
    #[error("actor resolution failed: {0}")]
    Actor(String),

    /// The target resolver could not read the destination.
    #[error("target resolution failed: {0}")]
    Target(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The connection already holds the maximum number of aliases.
    #[error("connection {connection} already holds {limit} aliases")]
    TooManyAliases {
        connection: ConnectionId,
        limit: usize,
    },

    /// A task had to be spawned outside a Tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("invalid server configuration: {0}")]
    Config(String),
}

impl BusError {
    /// Shorthand for middleware rejecting a message.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Where on the bus an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// A pipeline stage aborted.
    Stage(Stage),
    /// A raw frame could not be turned into an envelope.
    Parser,
    /// Emitting to a connection failed.
    Delivery,
    /// The exchange refused an envelope.
    Exchange,
    /// Accepting or aliasing a connection failed.
    Subscription,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Stage(stage) => write!(f, "{stage}"),
            ErrorSource::Parser => f.write_str("parser"),
            ErrorSource::Delivery => f.write_str("delivery"),
            ErrorSource::Exchange => f.write_str("exchange"),
            ErrorSource::Subscription => f.write_str("subscription"),
        }
    }
}

/// One failure, with whatever context was available.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: ErrorSource,
    pub error: BusError,
    pub message_id: Option<MessageId>,
    pub connection: Option<ConnectionId>,
}

impl ErrorReport {
    pub fn new(source: ErrorSource, error: BusError) -> Self {
        Self {
            source,
            error,
            message_id: None,
            connection: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionId) -> Self {
        self.connection = Some(connection);
        self
    }
}

/// Sink for every error raised on the bus.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, report: &ErrorReport);
}

/// Default handler: log and carry on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrors;

impl ErrorHandler for LogErrors {
    fn handle(&self, report: &ErrorReport) {
        error!(
            source = %report.source,
            message_id = ?report.message_id,
            connection_id = ?report.connection,
            error = %report.error,
            "Bus error"
        );
    }
}

impl<F> ErrorHandler for F
where
    F: Fn(&ErrorReport) + Send + Sync,
{
    fn handle(&self, report: &ErrorReport) {
        self(report)
    }
}
