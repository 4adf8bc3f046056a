//! WebSocket connection handler.
//!
//! Each socket is split in two:
//! - a writer task that drains the connection's outbox and sends pings
//! - the reader loop below, which checks limits and feeds frames to the bus
//!
//! Security features:
//! - Message size limits (default 1MB)
//! - Rate limiting per connection
//! - Idle timeout

use axum::extract::ws::{Message, WebSocket};
use bus_server::{Connection, ErrorReport, ErrorSource, Handshake, Server};
use bus_types::{InboundFrame, WireEvent};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::metrics::GatewayMetrics;

/// Event name used for transport-level errors sent to the client.
pub const ERROR_EVENT: &str = "error";

/// WebSocket connection handler
pub struct WebSocketHandler {
    server: Server,
    config: Arc<GatewayConfig>,
    metrics: Arc<GatewayMetrics>,
    /// Message counter for rate limiting
    message_count: u32,
    /// Rate limit window start
    rate_limit_window: Instant,
}

impl WebSocketHandler {
    pub fn new(server: Server, config: Arc<GatewayConfig>, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            server,
            config,
            metrics,
            message_count: 0,
            rate_limit_window: Instant::now(),
        }
    }

    /// Check rate limit, returns true if request is allowed
    fn check_rate_limit(&mut self) -> bool {
        let now = Instant::now();

        // Reset window every second
        if now.duration_since(self.rate_limit_window) >= Duration::from_secs(1) {
            self.rate_limit_window = now;
            self.message_count = 0;
        }

        self.message_count += 1;
        self.message_count <= self.config.rate_limit
    }

    /// Check message size, returns the rejection reason if too large
    fn check_message_size(&self, size: usize) -> Option<String> {
        (size > self.config.max_message_size).then(|| {
            format!(
                "Message too large: {} bytes (max: {})",
                size, self.config.max_message_size
            )
        })
    }

    /// Handle a WebSocket connection until either side closes it.
    pub async fn handle(mut self, socket: WebSocket, handshake: Handshake) {
        let (connection, outbox) = self.server.connection(handshake);
        let connection_id = connection.id();

        if let Err(error) = self.server.accept(&connection) {
            self.server.report(
                ErrorReport::new(ErrorSource::Subscription, error).with_connection(connection_id),
            );
            connection.close();
            return;
        }

        self.metrics.record_ws_connect();
        info!(connection_id = %connection_id, "New WebSocket connection");

        let (sink, stream) = socket.split();
        let writer = tokio::spawn(write_events(
            sink,
            outbox,
            connection.clone(),
            self.config.ping_interval(),
            Arc::clone(&self.metrics),
        ));

        self.read_frames(stream, &connection).await;

        // Cleanup subscriptions on disconnect
        self.server.disconnect(&connection);
        if let Err(e) = writer.await {
            warn!(connection_id = %connection_id, error = %e, "WebSocket writer failed");
        }
        self.metrics.record_ws_disconnect();

        info!(connection_id = %connection_id, "WebSocket connection closed");
    }

    async fn read_frames(&mut self, mut stream: SplitStream<WebSocket>, connection: &Connection) {
        let idle_timeout = self.config.idle_timeout();

        loop {
            let result = tokio::select! {
                _ = connection.closed() => break,
                next = tokio::time::timeout(idle_timeout, stream.next()) => match next {
                    Ok(Some(result)) => result,
                    Ok(None) => break,
                    Err(_) => {
                        info!(connection_id = %connection.id(), "Closing idle WebSocket connection");
                        break;
                    }
                },
            };

            let text = match result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        self.metrics.record_malformed();
                        reject(connection, "Binary frames must be UTF-8 JSON");
                        continue;
                    }
                },
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %connection.id(), "WebSocket close received");
                    break;
                }
                Err(e) => {
                    warn!(connection_id = %connection.id(), error = %e, "WebSocket error");
                    break;
                }
            };

            self.metrics.record_ws_received();

            if let Some(reason) = self.check_message_size(text.len()) {
                warn!(
                    connection_id = %connection.id(),
                    size = text.len(),
                    max = self.config.max_message_size,
                    "Message exceeds size limit"
                );
                self.metrics.record_oversized();
                reject(connection, &reason);
                continue;
            }

            if !self.check_rate_limit() {
                self.metrics.record_rate_limit_rejection();
                reject(connection, "Rate limit exceeded");
                continue;
            }

            let frame = match InboundFrame::parse(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    self.metrics.record_malformed();
                    reject(connection, &e.to_string());
                    continue;
                }
            };

            // Errors are routed to the server's error handler.
            let _ = self.server.receive(connection, frame).await;
        }
    }
}

/// Queue an `["error", reason]` event for the client.
fn reject(connection: &Connection, reason: &str) {
    let event = WireEvent::new(ERROR_EVENT, vec![Value::String(reason.to_string())]);
    if let Err(e) = connection.emit(event) {
        debug!(connection_id = %connection.id(), error = %e, "Could not send error event");
    }
}

/// Writes outbox events and periodic pings until the connection closes.
async fn write_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<WireEvent>,
    connection: Connection,
    ping_interval: Duration,
    metrics: Arc<GatewayMetrics>,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await;

    loop {
        let message = tokio::select! {
            event = outbox.recv() => match event {
                Some(event) => Message::Text(event.to_text()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
            _ = connection.closed() => break,
        };

        let is_event = matches!(message, Message::Text(_));
        if let Err(e) = sink.send(message).await {
            warn!(connection_id = %connection.id(), error = %e, "Failed to send WebSocket message");
            connection.close();
            return;
        }
        if is_event {
            metrics.record_ws_message();
        }
    }

    // Flush whatever was queued before the close.
    while let Ok(event) = outbox.try_recv() {
        if sink.send(Message::Text(event.to_text())).await.is_err() {
            return;
        }
        metrics.record_ws_message();
    }
    let _ = sink.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn handler(config: GatewayConfig) -> WebSocketHandler {
        WebSocketHandler::new(
            Server::new().unwrap(),
            Arc::new(config),
            Arc::new(GatewayMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let mut handler = handler(GatewayConfig {
            rate_limit: 2,
            ..Default::default()
        })
        .await;

        assert!(handler.check_rate_limit());
        assert!(handler.check_rate_limit());
        assert!(!handler.check_rate_limit());

        handler.rate_limit_window = Instant::now().checked_sub(Duration::from_secs(2)).unwrap();
        assert!(handler.check_rate_limit());
    }

    #[tokio::test]
    async fn test_message_size() {
        let handler = handler(GatewayConfig {
            max_message_size: 8,
            ..Default::default()
        })
        .await;

        assert!(handler.check_message_size(8).is_none());
        let reason = handler.check_message_size(9).unwrap();
        assert!(reason.contains("9 bytes"));
    }

    #[tokio::test]
    async fn test_reject_emits_error_event() {
        let server = Server::new().unwrap();
        let (connection, mut outbox) = server.connection(Handshake::default());

        reject(&connection, "Rate limit exceeded");

        let event = outbox.recv().await.unwrap();
        assert_eq!(event.event, ERROR_EVENT);
        assert_eq!(event.to_text(), r#"["error","Rate limit exceeded"]"#);
    }
}
