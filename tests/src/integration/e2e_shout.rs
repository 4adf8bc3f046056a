//! # End-to-End Shout Flow
//!
//! The complete round trip every client of the bus relies on:
//!
//! ```text
//! ["shout", "hello", "zion"]
//!   → target resolver pops "zion"
//!   → inbound appends "!!!"            "hello!!!"
//!   → queue → processing responds      "hello!!!!!!"
//!   → channel "zion"
//!   → outbound capitalizes             "Hello!!!!!!"
//!   → ["shout", "zion", "Hello!!!!!!", "zion", created]
//! ```
//!
//! Plus the teardown cases around it: disconnects mid-flight and saturated
//! subscribers.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bus_runtime::demo;
    use bus_server::{
        Connection, ErrorReport, ErrorSource, Handshake, InboundFrame, Server, ServerConfig,
        WireEvent,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    fn shout_server(config: ServerConfig) -> Server {
        let server = Server::builder().config(config).build().unwrap();
        demo::install(&server);
        server
    }

    fn join(server: &Server) -> (Connection, mpsc::Receiver<WireEvent>) {
        let (connection, outbox) = server.connection(Handshake::default());
        server.accept(&connection).unwrap();
        (connection, outbox)
    }

    async fn shout(server: &Server, connection: &Connection, word: &str) {
        let frame = InboundFrame::new("shout", vec![json!(word), json!("zion")]);
        server.receive(connection, frame).await.unwrap();
    }

    async fn next_event(outbox: &mut mpsc::Receiver<WireEvent>) -> WireEvent {
        timeout(WAIT, outbox.recv())
            .await
            .expect("timeout waiting for event")
            .expect("outbox closed")
    }

    #[tokio::test]
    async fn test_shout_round_trip() {
        let server = shout_server(ServerConfig::default());
        let (client, mut outbox) = join(&server);
        assert_eq!(server.channels(client.id()).len(), 2);

        shout(&server, &client, "hello").await;

        let event = next_event(&mut outbox).await;
        let value = event.to_value();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], json!("shout"));
        assert_eq!(items[1], json!("zion"));
        assert_eq!(items[2], json!("Hello!!!!!!"));
        assert_eq!(items[3], json!("zion"));
        assert!(items[4].as_str().unwrap().contains('T'));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(outbox.try_recv().is_err());
    }

    /// Every listener on "zion" hears every shout, in publication order.
    #[tokio::test]
    async fn test_shouts_fan_out_in_order() {
        let server = shout_server(ServerConfig::default());
        let (alice, mut alice_out) = join(&server);
        let (bob, mut bob_out) = join(&server);

        shout(&server, &alice, "one").await;
        shout(&server, &bob, "two").await;
        shout(&server, &alice, "three").await;

        for outbox in [&mut alice_out, &mut bob_out] {
            let mut heard = Vec::new();
            for _ in 0..3 {
                heard.push(next_event(outbox).await.args[1].clone());
            }
            assert_eq!(
                heard,
                vec![json!("One!!!!!!"), json!("Two!!!!!!"), json!("Three!!!!!!")]
            );
        }
    }

    /// A disconnected listener is skipped; the others are unaffected.
    #[tokio::test]
    async fn test_disconnect_mid_flight() {
        let server = shout_server(ServerConfig::default());
        let (alice, mut alice_out) = join(&server);
        let (bob, mut bob_out) = join(&server);

        shout(&server, &alice, "before").await;
        server.disconnect(&bob);
        shout(&server, &alice, "after").await;

        let first = next_event(&mut alice_out).await;
        let second = next_event(&mut alice_out).await;
        assert_eq!(first.args[1], json!("Before!!!!!!"));
        assert_eq!(second.args[1], json!("After!!!!!!"));

        // Bob may or may not have heard the first shout, never the second.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = bob_out.try_recv() {
            assert_ne!(event.args[1], json!("After!!!!!!"));
        }
        assert!(server.channels(bob.id()).is_empty());
        assert!(bob.is_closed());
    }

    /// A closed connection cannot be linked to new channels.
    #[tokio::test]
    async fn test_alias_after_disconnect_fails() {
        let server = shout_server(ServerConfig::default());
        let (alice, _outbox) = join(&server);
        server.disconnect(&alice);

        assert!(server.alias(&alice, "elsewhere").is_err());
        assert!(server.channels(alice.id()).is_empty());
    }

    /// A full outbox drops that connection's event and reports it.
    #[tokio::test]
    async fn test_saturated_listener_does_not_block_others() {
        let server = shout_server(ServerConfig {
            outbound_buffer: 1,
            ..Default::default()
        });
        let errors = Arc::new(Mutex::new(Vec::<ErrorReport>::new()));
        let sink = Arc::clone(&errors);
        server.on_error(move |report: &ErrorReport| sink.lock().push(report.clone()));

        let (alice, mut alice_out) = join(&server);
        let (slow, _slow_out) = join(&server);

        shout(&server, &alice, "one").await;
        assert_eq!(next_event(&mut alice_out).await.args[1], json!("One!!!!!!"));
        shout(&server, &alice, "two").await;
        assert_eq!(next_event(&mut alice_out).await.args[1], json!("Two!!!!!!"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, ErrorSource::Delivery);
        assert_eq!(errors[0].connection, Some(slow.id()));
        assert_eq!(server.metrics().snapshot().deliveries_dropped, 1);
    }
}
