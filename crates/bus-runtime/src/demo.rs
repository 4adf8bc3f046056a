//! # Shout Demo
//!
//! Handlers for the classic "shout" round trip:
//!
//! ```text
//! client:   ["shout", "hello", "zion"]
//! target:   "zion"          (last arg popped)
//! inbound:  "hello!!!"
//! shout:    "hello!!!!!!"   (respond)
//! outbound: "Hello!!!!!!"
//! client ←  ["shout", "zion", "Hello!!!!!!", "zion", created]
//! ```
//!
//! Every connection is aliased to [`DEMO_CHANNEL`] on connect.

use bus_server::{from_fn, target_fn, BusError, Connection, InboundFrame, Message, Server, Value};

/// Channel every demo connection listens on.
pub const DEMO_CHANNEL: &str = "zion";

/// Action handled by the demo.
pub const SHOUT_ACTION: &str = "shout";

/// Install the demo hook, resolver and middleware on `server`.
pub fn install(server: &Server) {
    server.on_connection(|server: &Server, connection: &Connection| {
        server.alias(connection, DEMO_CHANNEL).map(|_| ())
    });

    server.set_target_resolver(target_fn(pop_target));

    server.inbound(from_fn(|message: &mut Message, _: Option<&Connection>| {
        if let Some(Value::String(text)) = message.content_mut().first_mut() {
            text.push_str("!!!");
        }
        Ok(())
    }));

    server.on(SHOUT_ACTION, from_fn(shout));

    server.outbound(from_fn(|message: &mut Message, _: Option<&Connection>| {
        if let Some(Value::String(text)) = message.content_mut().first_mut() {
            *text = capitalize(text);
        }
        Ok(())
    }));
}

/// The last string arg names the target.
fn pop_target(_: &Connection, frame: &mut InboundFrame) -> Result<Option<String>, BusError> {
    if !matches!(frame.args.last(), Some(Value::String(_))) {
        return Ok(None);
    }
    match frame.args.pop() {
        Some(Value::String(target)) => Ok(Some(target)),
        _ => Ok(None),
    }
}

fn shout(message: &mut Message, _: Option<&Connection>) -> Result<(), BusError> {
    let last = message
        .content()
        .last()
        .and_then(Value::as_str)
        .ok_or_else(|| BusError::rejected("shout needs a text argument"))?;
    let reply = format!("{last}!!!");
    message.respond(reply);
    Ok(())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_server::Handshake;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("hello!!!"), "Hello!!!");
        assert_eq!(capitalize("élan"), "Élan");
        assert_eq!(capitalize(""), "");
    }

    #[tokio::test]
    async fn test_shout_round_trip() {
        let server = Server::new().unwrap();
        install(&server);

        let (connection, mut outbox) = server.connection(Handshake::default());
        server.accept(&connection).unwrap();
        assert!(server.channels(connection.id()).contains(&DEMO_CHANNEL.to_string()));

        let frame = InboundFrame::parse(r#"["shout", "hello", "zion"]"#).unwrap();
        server.receive(&connection, frame).await.unwrap();

        let event = timeout(Duration::from_secs(1), outbox.recv())
            .await
            .expect("timeout")
            .expect("event");
        let value = event.to_value();
        assert_eq!(value[0], "shout");
        assert_eq!(value[1], "zion");
        assert_eq!(value[2], "Hello!!!!!!");
        assert_eq!(value[3], "zion");
        assert_eq!(event.args.len(), 4);
    }

    #[tokio::test]
    async fn test_shout_without_text_is_rejected() {
        let server = Server::new().unwrap();
        install(&server);

        let (connection, mut outbox) = server.connection(Handshake::default());
        server.accept(&connection).unwrap();

        let frame = InboundFrame::parse(r#"["shout", 42]"#).unwrap();
        server.receive(&connection, frame).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(outbox.try_recv().is_err());
        assert_eq!(server.metrics().snapshot().processing_failed, 1);
    }
}
