//! Pipeline view of an envelope.

use bus_types::{Envelope, MessageId, Value};

/// What the processing stage decided to do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// No decision yet; the server's auto-propagate flag decides.
    #[default]
    Pending,
    /// Publish on the channel once processing completes.
    Deliver,
    /// Stop here; nothing is published.
    Consumed,
}

/// An envelope travelling through a pipeline stage.
#[derive(Debug, Clone)]
pub struct Message {
    envelope: Envelope,
    disposition: Disposition,
}

impl Message {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            disposition: Disposition::Pending,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    pub fn id(&self) -> MessageId {
        self.envelope.id
    }

    pub fn action(&self) -> &str {
        &self.envelope.action
    }

    pub fn actor(&self) -> &str {
        &self.envelope.actor
    }

    pub fn target(&self) -> Option<&str> {
        self.envelope.target.as_deref()
    }

    pub fn content(&self) -> &[Value] {
        &self.envelope.content
    }

    pub fn content_mut(&mut self) -> &mut Vec<Value> {
        &mut self.envelope.content
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// Turn this message into a reply carrying `value`.
    ///
    /// The reply is sent as the original target (when there was one), refers
    /// back to the answered message and is marked for delivery.
    pub fn respond(&mut self, value: impl Into<Value>) -> &mut Self {
        let answered = self.envelope.id;
        self.envelope.id = MessageId::new();
        self.envelope.reference = Some(answered);
        self.envelope.content = vec![value.into()];
        if let Some(target) = &self.envelope.target {
            self.envelope.actor = target.clone();
        }
        self.disposition = Disposition::Deliver;
        self
    }

    /// Publish after processing regardless of auto-propagate.
    pub fn deliver(&mut self) -> &mut Self {
        self.disposition = Disposition::Deliver;
        self
    }

    /// Do not publish after processing.
    pub fn consume(&mut self) -> &mut Self {
        self.disposition = Disposition::Consumed;
        self
    }
}

impl From<Envelope> for Message {
    fn from(envelope: Envelope) -> Self {
        Self::new(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_message_is_pending() {
        let message = Message::new(Envelope::new("shout", "alice", vec![json!("hi")]));
        assert_eq!(message.disposition(), Disposition::Pending);
        assert_eq!(message.action(), "shout");
        assert_eq!(message.actor(), "alice");
        assert_eq!(message.content(), &[json!("hi")]);
    }

    #[test]
    fn test_respond_readdresses_reply() {
        let envelope = Envelope::new("shout", "alice", vec![json!("a"), json!("b")])
            .with_target("zion");
        let original_id = envelope.id;
        let mut message = Message::new(envelope);

        message.respond("pong");

        assert_eq!(message.content(), &[json!("pong")]);
        assert_eq!(message.actor(), "zion");
        assert_eq!(message.target(), Some("zion"));
        assert_eq!(message.envelope().reference, Some(original_id));
        assert_ne!(message.id(), original_id);
        assert_eq!(message.disposition(), Disposition::Deliver);
    }

    #[test]
    fn test_respond_without_target_keeps_actor() {
        let mut message = Message::new(Envelope::new("ping", "alice", vec![]));
        message.respond(json!({"ok": true}));
        assert_eq!(message.actor(), "alice");
        assert_eq!(message.target(), None);
    }

    #[test]
    fn test_consume_and_deliver() {
        let mut message = Message::new(Envelope::new("ping", "alice", vec![]));
        message.consume();
        assert_eq!(message.disposition(), Disposition::Consumed);
        message.deliver();
        assert_eq!(message.disposition(), Disposition::Deliver);
    }
}
