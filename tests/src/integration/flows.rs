//! # Routing Flows
//!
//! Exercises bus-server, bus-exchange and bus-types together through the
//! public [`Server`](bus_server::Server) API.
//!
//! ## Flows Tested
//!
//! 1. **Actor broadcast**: no target → actor channel, seen by followers
//! 2. **Unicast**: target set → only the target channel
//! 3. **Dispositions**: auto-propagate off, explicit deliver, consume
//! 4. **Injected messages**: `Server::message` from outside any connection
//! 5. **Rejections**: unknown actions and failing stages reach the error handler
//! 6. **Backends**: swapped queue and pub/sub keep traffic flowing

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bus_exchange::{MemoryPubSub, MemoryQueue};
    use bus_server::{
        from_fn, target_fn, BusError, Connection, Envelope, ErrorReport, ErrorSource,
        Handshake, InboundFrame, Message, Server, ServerConfig, Stage, Value, WireEvent,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const WAIT: Duration = Duration::from_secs(1);

    fn noop() -> impl bus_server::Middleware {
        from_fn(|_: &mut Message, _: Option<&Connection>| Ok(()))
    }

    /// Server whose target resolver pops a trailing `"@name"` arg.
    fn server_with(config: ServerConfig) -> Server {
        let server = Server::builder().config(config).build().unwrap();
        server.set_target_resolver(target_fn(|_: &Connection, frame: &mut InboundFrame| {
            let addressed = frame
                .args
                .last()
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with('@'));
            if !addressed {
                return Ok(None);
            }
            Ok(frame
                .args
                .pop()
                .and_then(|v| v.as_str().map(|s| s.trim_start_matches('@').to_string())))
        }));
        server
    }

    fn server() -> Server {
        server_with(ServerConfig::default())
    }

    fn collect_errors(server: &Server) -> Arc<Mutex<Vec<ErrorReport>>> {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        server.on_error(move |report: &ErrorReport| sink.lock().push(report.clone()));
        errors
    }

    fn join(server: &Server) -> (Connection, mpsc::Receiver<WireEvent>, String) {
        let (connection, outbox) = server.connection(Handshake::default());
        let actor = server.accept(&connection).unwrap();
        (connection, outbox, actor)
    }

    async fn send(server: &Server, connection: &Connection, frame: &str) {
        let frame = InboundFrame::parse(frame).unwrap();
        server.receive(connection, frame).await.unwrap();
    }

    async fn next_event(outbox: &mut mpsc::Receiver<WireEvent>) -> WireEvent {
        timeout(WAIT, outbox.recv())
            .await
            .expect("timeout waiting for event")
            .expect("outbox closed")
    }

    async fn assert_silent(outbox: &mut mpsc::Receiver<WireEvent>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(outbox.try_recv().is_err(), "unexpected event");
    }

    // =============================================================================
    // INTEGRATION TESTS: ROUTING
    // =============================================================================

    /// No target: the message goes out on the sender's actor channel.
    #[tokio::test]
    async fn test_broadcast_reaches_actor_followers() {
        let server = server();
        server.on("wave", noop());

        let (alice, mut alice_out, alice_actor) = join(&server);
        let (bob, mut bob_out, _) = join(&server);
        let (_carol, mut carol_out, _) = join(&server);
        assert!(server.alias(&bob, &alice_actor).unwrap());

        send(&server, &alice, r#"["wave", "hi"]"#).await;

        for outbox in [&mut alice_out, &mut bob_out] {
            let event = next_event(outbox).await;
            assert_eq!(event.event, "wave");
            assert_eq!(event.args[0], json!(alice_actor));
            assert_eq!(event.args[1], json!("hi"));
            assert_eq!(event.args[2], Value::Null);
        }
        assert_silent(&mut carol_out).await;
    }

    /// Target set: only the target channel, never the actor channel.
    #[tokio::test]
    async fn test_unicast_skips_actor_channel() {
        let server = server();
        server.on("whisper", noop());

        let (alice, mut alice_out, _) = join(&server);
        let (bob, mut bob_out, _) = join(&server);
        server.alias(&bob, "lobby").unwrap();

        send(&server, &alice, r#"["whisper", "psst", "@lobby"]"#).await;

        let event = next_event(&mut bob_out).await;
        assert_eq!(event.event, "whisper");
        assert_eq!(event.args[1], json!("psst"));
        assert_eq!(event.args[2], json!("lobby"));
        assert_silent(&mut alice_out).await;
    }

    /// Every accepted frame is published exactly once on its channel.
    #[tokio::test]
    async fn test_one_delivery_per_frame() {
        let server = server();
        server.on("tick", noop());
        let (alice, mut alice_out, _) = join(&server);

        for i in 0..5 {
            send(&server, &alice, &format!(r#"["tick", {i}]"#)).await;
        }
        for i in 0..5 {
            assert_eq!(next_event(&mut alice_out).await.args[1], json!(i));
        }
        assert_silent(&mut alice_out).await;

        let metrics = server.metrics().snapshot();
        assert_eq!(metrics.messages_queued, 5);
        assert_eq!(metrics.channel_publications, 5);
        assert_eq!(metrics.deliveries, 5);
    }

    // =============================================================================
    // INTEGRATION TESTS: DISPOSITIONS
    // =============================================================================

    #[tokio::test]
    async fn test_auto_propagate_off_requires_explicit_delivery() {
        let server = server_with(ServerConfig {
            auto_propagate: false,
            ..Default::default()
        });
        server.on("quiet", noop());
        server.on(
            "loud",
            from_fn(|message: &mut Message, _: Option<&Connection>| {
                message.deliver();
                Ok(())
            }),
        );
        let (alice, mut alice_out, _) = join(&server);

        send(&server, &alice, r#"["quiet"]"#).await;
        send(&server, &alice, r#"["loud"]"#).await;

        assert_eq!(next_event(&mut alice_out).await.event, "loud");
        assert_silent(&mut alice_out).await;
        assert_eq!(server.metrics().snapshot().messages_consumed, 1);
    }

    #[tokio::test]
    async fn test_consume_wins_over_auto_propagate() {
        let server = server();
        server.on(
            "secret",
            from_fn(|message: &mut Message, _: Option<&Connection>| {
                message.consume();
                Ok(())
            }),
        );
        let (alice, mut alice_out, _) = join(&server);

        send(&server, &alice, r#"["secret"]"#).await;
        assert_silent(&mut alice_out).await;
    }

    /// Flipping the flag at runtime applies to the next processed message.
    #[tokio::test]
    async fn test_toggle_auto_propagate() {
        let server = server();
        server.on("ping", noop());
        let (alice, mut alice_out, _) = join(&server);

        server.set_auto_propagate(false);
        send(&server, &alice, r#"["ping", 1]"#).await;
        assert_silent(&mut alice_out).await;

        server.set_auto_propagate(true);
        send(&server, &alice, r#"["ping", 2]"#).await;
        assert_eq!(next_event(&mut alice_out).await.args[1], json!(2));
    }

    // =============================================================================
    // INTEGRATION TESTS: INJECTED MESSAGES
    // =============================================================================

    #[tokio::test]
    async fn test_injected_message_goes_through_processing() {
        let server = server();
        server.on(
            "notice",
            from_fn(|message: &mut Message, _: Option<&Connection>| {
                message.content_mut().push(json!("stamped"));
                Ok(())
            }),
        );
        let (bob, mut bob_out, _) = join(&server);
        server.alias(&bob, "lobby").unwrap();

        let envelope =
            Envelope::new("notice", "system", vec![json!("doors open")]).with_target("lobby");
        let builder = server.message(envelope);
        assert!(builder.deliver());
        assert!(!builder.deliver());

        let event = next_event(&mut bob_out).await;
        assert_eq!(event.event, "notice");
        assert_eq!(event.args[0], json!("system"));
        assert_eq!(event.args[1], json!("doors open"));
        assert_eq!(event.args[2], json!("stamped"));
        assert_eq!(event.args[3], json!("lobby"));
        assert_silent(&mut bob_out).await;
    }

    #[tokio::test]
    async fn test_published_envelope_skips_queue() {
        let server = server();
        let (bob, mut bob_out, _) = join(&server);
        server.alias(&bob, "lobby").unwrap();

        let mut envelope = Envelope::new("direct", "system", vec![]).with_target("lobby");
        assert!(envelope.mark_published());

        let publication = server.publish(envelope).unwrap();
        assert!(matches!(
            publication,
            bus_server::Publication::Channel { receivers: 1, .. }
        ));
        assert_eq!(next_event(&mut bob_out).await.event, "direct");
        assert_eq!(server.metrics().snapshot().messages_queued, 0);
    }

    // =============================================================================
    // INTEGRATION TESTS: REJECTIONS
    // =============================================================================

    #[tokio::test]
    async fn test_unknown_action_reported_not_routed() {
        let server = server();
        let errors = collect_errors(&server);
        let (alice, mut alice_out, _) = join(&server);

        let result = server
            .receive(&alice, InboundFrame::new("mystery", vec![]))
            .await;
        assert_eq!(result, Err(BusError::UnrecognizedAction("mystery".into())));

        assert_silent(&mut alice_out).await;
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, ErrorSource::Parser);
        assert_eq!(errors[0].connection, Some(alice.id()));
    }

    #[tokio::test]
    async fn test_outbound_failure_only_affects_that_connection() {
        let server = server();
        server.on("wave", noop());
        let errors = collect_errors(&server);

        let (alice, mut alice_out, _) = join(&server);
        let (bob, mut bob_out, _) = join(&server);
        server.alias(&alice, "lobby").unwrap();
        server.alias(&bob, "lobby").unwrap();

        let blocked = bob.id();
        server.outbound(from_fn(move |_: &mut Message, connection: Option<&Connection>| {
            match connection {
                Some(connection) if connection.id() == blocked => {
                    Err(BusError::rejected("muted"))
                }
                _ => Ok(()),
            }
        }));

        send(&server, &alice, r#"["wave", "@lobby"]"#).await;

        assert_eq!(next_event(&mut alice_out).await.event, "wave");
        assert_silent(&mut bob_out).await;

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, ErrorSource::Stage(Stage::Outbound));
        assert_eq!(errors[0].connection, Some(bob.id()));
    }

    // =============================================================================
    // INTEGRATION TESTS: BACKENDS
    // =============================================================================

    #[tokio::test]
    async fn test_swapped_backends_keep_traffic_flowing() {
        let server = server();
        server.on("ping", noop());

        server.set_queue(Arc::new(MemoryQueue::new()));
        server.set_pubsub(Arc::new(MemoryPubSub::with_capacity(16)));

        // Subscriptions made after the swap use the new pub/sub.
        let (alice, mut alice_out, _) = join(&server);
        send(&server, &alice, r#"["ping", "after swap"]"#).await;

        let event = next_event(&mut alice_out).await;
        assert_eq!(event.args[1], json!("after swap"));
        assert_eq!(server.pubsub().listener_count(&alice.id().to_string()), 1);
    }
}
