//! # Message Envelope
//!
//! The canonical record every client action is normalized into.
//!
//! ## Publication
//!
//! `published` starts absent and is stamped exactly once by
//! [`Envelope::mark_published`]. The stamp is clamped so it is never earlier
//! than `created`, even if the wall clock moved backwards in between.

use crate::ids::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical structured message flowing through the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id of this message.
    pub id: MessageId,
    /// The verb, e.g. `"shout"`.
    pub action: String,
    /// Identity of the sender; also its default channel name.
    pub actor: String,
    /// Positional arguments of the action.
    pub content: Vec<Value>,
    /// Destination channel override. `None` means broadcast on `actor`.
    pub target: Option<String>,
    /// Set once at construction.
    pub created: DateTime<Utc>,
    /// Absent until the envelope is first published.
    published: Option<DateTime<Utc>>,
    /// Id of the message this one answers, if any.
    pub reference: Option<MessageId>,
}

impl Envelope {
    /// Create an unpublished envelope stamped with the current time.
    pub fn new(action: impl Into<String>, actor: impl Into<String>, content: Vec<Value>) -> Self {
        Self {
            id: MessageId::new(),
            action: action.into(),
            actor: actor.into(),
            content,
            target: None,
            created: Utc::now(),
            published: None,
            reference: None,
        }
    }

    /// Set the destination channel.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// When the envelope was first published, if it has been.
    #[must_use]
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    /// Whether the envelope has been published.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published.is_some()
    }

    /// Stamp `published` with the current time.
    ///
    /// Returns `false` without touching the stamp if it was already set.
    pub fn mark_published(&mut self) -> bool {
        if self.published.is_some() {
            return false;
        }
        self.published = Some(Utc::now().max(self.created));
        true
    }

    /// Channel this envelope is addressed to: `target` if set, else `actor`.
    #[must_use]
    pub fn channel(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.actor)
    }

    /// First content element as a string, if it is one.
    #[must_use]
    pub fn first_str(&self) -> Option<&str> {
        self.content.first().and_then(Value::as_str)
    }
}
