//! Wire frames exchanged with clients.
//!
//! Inbound frames are JSON arrays `[action, ...args]`. Outbound events keep
//! the positional layout existing clients destructure:
//!
//! ```text
//! [action, actor, ...content, target, created]
//! ```
//!
//! `target` is `null` when absent and `created` is RFC 3339.

use crate::envelope::Envelope;
use serde_json::Value;
use thiserror::Error;

/// Errors decoding a client frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The payload was not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The payload was JSON but not a non-empty array.
    #[error("frame must be a non-empty JSON array")]
    NotAnArray,

    /// The first element was not a string action name.
    #[error("frame action must be a non-empty string")]
    MissingAction,
}

/// A raw `(action, ...args)` tuple received from a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub action: String,
    pub args: Vec<Value>,
}

impl InboundFrame {
    pub fn new(action: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }

    /// Decode a frame from its JSON text form.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode a frame from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let Value::Array(mut items) = value else {
            return Err(FrameError::NotAnArray);
        };
        if items.is_empty() {
            return Err(FrameError::NotAnArray);
        }

        let action = match items.remove(0) {
            Value::String(s) if !s.is_empty() => s,
            _ => return Err(FrameError::MissingAction),
        };

        Ok(Self {
            action,
            args: items,
        })
    }
}

/// One event emitted to a connection: an event name plus positional args.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    pub event: String,
    pub args: Vec<Value>,
}

impl WireEvent {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// Unpack an envelope into `action, actor, ...content, target, created`.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let mut args = Vec::with_capacity(envelope.content.len() + 3);
        args.push(Value::String(envelope.actor.clone()));
        args.extend(envelope.content.iter().cloned());
        args.push(
            envelope
                .target
                .as_ref()
                .map_or(Value::Null, |t| Value::String(t.clone())),
        );
        args.push(Value::String(envelope.created.to_rfc3339()));

        Self {
            event: envelope.action.clone(),
            args,
        }
    }

    /// The whole event as one JSON array, event name first.
    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(Value::String(self.event.clone()));
        items.extend(self.args.iter().cloned());
        Value::Array(items)
    }

    /// Serialized text form sent over the transport.
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}
