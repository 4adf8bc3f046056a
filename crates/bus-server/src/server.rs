//! # Bus Server
//!
//! Wires connections, the three pipeline stages and the exchange together.
//!
//! ## Message Flow
//!
//! ```text
//! frame ─→ parser ─→ [inbound] ─→ builder ─→ publish ─→ queue
//!                                                         │
//!          ┌──────────────────────────────────────────────┘
//!          ↓
//!     [processing] ─→ publish ─→ channel (target, else actor)
//!                                   │
//!                                   ↓ one forwarder per (connection, channel)
//!                              [outbound] ─→ connection.emit
//! ```
//!
//! ## Publish Decision
//!
//! [`Server::publish`] looks at the envelope's `published` stamp:
//! - absent: stamp it and hand the envelope to the queue for processing
//! - present: publish on the target channel, or the actor channel when there
//!   is no target
//!
//! ## Ordering
//!
//! Frames of one connection are processed in the order the transport awaits
//! [`Server::receive`]. The queue is drained by a single consumer task, and
//! each forwarder runs the outbound stage inline, so every
//! (connection, channel) pair sees messages in publication order.

use bus_exchange::{ChannelSubscription, Exchange, PubSub, Queue, Received, Route};
use bus_types::{ConnectionId, Envelope, InboundFrame, MessageId, WireEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::builder::{MessageBuilder, PublishSink};
use crate::config::ServerConfig;
use crate::connection::{Connection, Handshake, WeakConnection};
use crate::error::{BusError, ConnectionError, ErrorHandler, ErrorReport, ErrorSource, LogErrors};
use crate::message::{Disposition, Message};
use crate::metrics::BusMetrics;
use crate::parser::{ActorResolver, MessageParser, TargetResolver};
use crate::pipeline::{Middleware, Pipeline, Stage};
use crate::subscriptions::{LinkKind, SubscriptionRegistry};

/// Runs once for every accepted connection, after its actor channel is live.
pub trait ConnectionHook: Send + Sync {
    fn on_connection(&self, server: &Server, connection: &Connection) -> Result<(), BusError>;
}

impl<F> ConnectionHook for F
where
    F: Fn(&Server, &Connection) -> Result<(), BusError> + Send + Sync,
{
    fn on_connection(&self, server: &Server, connection: &Connection) -> Result<(), BusError> {
        self(server, connection)
    }
}

/// Which path a [`Server::publish`] call took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// Stamped and handed to the processing queue.
    Queued,
    /// Published on a channel.
    Channel { route: Route, receivers: usize },
}

struct Inner {
    auto_propagate: AtomicBool,
    outbound_buffer: usize,
    exchange: RwLock<Arc<Exchange>>,
    parser: MessageParser,
    inbound: Pipeline,
    processing: Pipeline,
    outbound: Pipeline,
    subscriptions: SubscriptionRegistry,
    hooks: RwLock<Vec<Arc<dyn ConnectionHook>>>,
    error_handler: RwLock<Arc<dyn ErrorHandler>>,
    metrics: Arc<BusMetrics>,
    exchange_changed: Arc<Notify>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn exchange(&self) -> Arc<Exchange> {
        self.exchange.read().clone()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.get_mut().take() {
            consumer.abort();
        }
        self.subscriptions.release_all();
    }
}

/// The message routing orchestrator.
///
/// Cheap to clone; every clone drives the same bus.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Server with default collaborators. Must be called inside a Tokio runtime.
    pub fn new() -> Result<Self, BusError> {
        ServerBuilder::new().build()
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    // =========================================================================
    // Configuration surface
    // =========================================================================

    /// Register `action` with the parser and add processing middleware for it.
    pub fn on(&self, action: impl Into<String>, middleware: impl Middleware + 'static) -> &Self {
        let action = action.into();
        self.inner.parser.register_action(action.clone());
        self.inner.processing.use_action(action, middleware);
        self
    }

    /// Add processing middleware that runs for every action.
    pub fn process(&self, middleware: impl Middleware + 'static) -> &Self {
        self.inner.processing.use_middleware(middleware);
        self
    }

    /// Add middleware to the client-to-bus stage.
    pub fn inbound(&self, middleware: impl Middleware + 'static) -> &Self {
        self.inner.inbound.use_middleware(middleware);
        self
    }

    /// Add middleware to the bus-to-client stage.
    pub fn outbound(&self, middleware: impl Middleware + 'static) -> &Self {
        self.inner.outbound.use_middleware(middleware);
        self
    }

    pub fn on_connection(&self, hook: impl ConnectionHook + 'static) -> &Self {
        self.inner.hooks.write().push(Arc::new(hook));
        self
    }

    /// Replace the error handler.
    pub fn on_error(&self, handler: impl ErrorHandler + 'static) -> &Self {
        *self.inner.error_handler.write() = Arc::new(handler);
        self
    }

    pub fn exchange(&self) -> Arc<Exchange> {
        self.inner.exchange()
    }

    /// Swap the exchange, moving every channel link and the queue consumer
    /// onto it.
    pub fn set_exchange(&self, exchange: Arc<Exchange>) {
        let stale = self.relink(|channel| exchange.subscribe(channel));
        *self.inner.exchange.write() = exchange;
        for task in stale {
            task.abort();
        }
        self.inner.exchange_changed.notify_one();
    }

    pub fn queue(&self) -> Arc<dyn Queue> {
        self.exchange().queue()
    }

    /// Swap the queue backend. The consumer follows any swap made on the
    /// exchange, including ones made through [`Server::exchange`].
    pub fn set_queue(&self, queue: Arc<dyn Queue>) {
        self.exchange().set_queue(queue);
    }

    pub fn pubsub(&self) -> Arc<dyn PubSub> {
        self.exchange().pubsub()
    }

    /// Swap the pub/sub backend, moving every live channel link onto it.
    ///
    /// Replacement forwarders subscribe before the swap, so nothing published
    /// on the new backend is missed.
    pub fn set_pubsub(&self, pubsub: Arc<dyn PubSub>) {
        let stale = self.relink(|channel| pubsub.subscribe(channel));
        self.exchange().set_pubsub(pubsub);
        for task in stale {
            task.abort();
        }
    }

    pub fn auto_propagate(&self) -> bool {
        self.inner.auto_propagate.load(Ordering::Relaxed)
    }

    pub fn set_auto_propagate(&self, enabled: bool) {
        self.inner.auto_propagate.store(enabled, Ordering::Relaxed);
    }

    pub fn parser(&self) -> &MessageParser {
        &self.inner.parser
    }

    pub fn set_actor_resolver(&self, resolver: impl ActorResolver + 'static) {
        self.inner.parser.set_actor_resolver(Arc::new(resolver));
    }

    pub fn set_target_resolver(&self, resolver: impl TargetResolver + 'static) {
        self.inner.parser.set_target_resolver(Arc::new(resolver));
    }

    pub fn pipeline(&self, stage: Stage) -> &Pipeline {
        match stage {
            Stage::Inbound => &self.inner.inbound,
            Stage::Processing => &self.inner.processing,
            Stage::Outbound => &self.inner.outbound,
        }
    }

    pub fn metrics(&self) -> Arc<BusMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Channels a connection currently listens on.
    pub fn channels(&self, connection: ConnectionId) -> Vec<String> {
        self.inner.subscriptions.channels(connection)
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// A builder that runs the publish decision when delivered.
    pub fn message(&self, envelope: Envelope) -> MessageBuilder {
        MessageBuilder::new(envelope, Arc::new(self.clone()))
    }

    /// Route an envelope according to its `published` stamp.
    pub fn publish(&self, mut envelope: Envelope) -> Result<Publication, BusError> {
        if envelope.mark_published() {
            let message_id = envelope.id;
            self.exchange().enqueue(envelope)?;
            self.inner.metrics.record_queued();
            debug!(message_id = %message_id, "Message queued for processing");
            return Ok(Publication::Queued);
        }

        let target = envelope.target.clone();
        let route = Route::resolve(&envelope, target.as_deref());
        let receivers = self.exchange().publish(envelope, target.as_deref());
        self.inner.metrics.record_publication();
        Ok(Publication::Channel { route, receivers })
    }

    /// Pass an error to the error handler.
    pub fn report(&self, report: ErrorReport) {
        let handler = self.inner.error_handler.read().clone();
        handler.handle(&report);
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Create a connection sized by `outbound_buffer`.
    ///
    /// The transport writes everything arriving on the returned receiver to
    /// the client.
    pub fn connection(&self, handshake: Handshake) -> (Connection, mpsc::Receiver<WireEvent>) {
        Connection::new(handshake, self.inner.outbound_buffer)
    }

    /// Subscribe a new connection to its actor channel and run the hooks.
    ///
    /// Returns the resolved actor.
    pub fn accept(&self, connection: &Connection) -> Result<String, BusError> {
        let actor = self.inner.parser.resolve_actor(connection)?;
        self.link(connection, &actor, LinkKind::Actor)?;
        self.inner.metrics.record_connect();

        info!(connection_id = %connection.id(), actor = %actor, "Connection accepted");

        let hooks = self.inner.hooks.read().clone();
        for hook in hooks {
            if let Err(error) = hook.on_connection(self, connection) {
                self.report(
                    ErrorReport::new(ErrorSource::Subscription, error)
                        .with_connection(connection.id()),
                );
            }
        }
        Ok(actor)
    }

    /// Also deliver messages published on `name` to this connection.
    ///
    /// Returns `false` if the connection already listens on `name`.
    pub fn alias(&self, connection: &Connection, name: &str) -> Result<bool, BusError> {
        self.link(connection, name, LinkKind::Alias)
    }

    /// Close a connection and tear down all of its channel forwarders.
    pub fn disconnect(&self, connection: &Connection) {
        let was_open = connection.close();
        let released = self.inner.subscriptions.release(connection.id());
        self.inner.metrics.record_unsubscribe(released as u64);
        if was_open && released > 0 {
            self.inner.metrics.record_disconnect();
            info!(
                connection_id = %connection.id(),
                channels = released,
                "Connection disconnected"
            );
        }
    }

    /// Feed one client frame through parsing and the inbound stage.
    ///
    /// Failures are reported to the error handler and also returned.
    pub async fn receive(
        &self,
        connection: &Connection,
        frame: InboundFrame,
    ) -> Result<MessageId, BusError> {
        self.inner.metrics.record_frame();

        let envelope = match self.inner.parser.parse(connection, frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                self.inner.metrics.record_frame_rejected();
                self.report(
                    ErrorReport::new(ErrorSource::Parser, error.clone())
                        .with_connection(connection.id()),
                );
                return Err(error);
            }
        };

        let message_id = envelope.id;
        let message = match self
            .inner
            .inbound
            .receive(Message::new(envelope), Some(connection))
            .await
        {
            Ok(message) => message,
            Err(error) => {
                self.inner.metrics.record_stage(Stage::Inbound, false);
                self.report(
                    ErrorReport::new(ErrorSource::Stage(Stage::Inbound), error.clone())
                        .with_message(message_id)
                        .with_connection(connection.id()),
                );
                return Err(error);
            }
        };
        self.inner.metrics.record_stage(Stage::Inbound, true);

        let message_id = message.id();
        self.message(message.into_envelope()).deliver();
        Ok(message_id)
    }

    /// Stop the queue consumer and every channel forwarder.
    pub fn shutdown(&self) {
        if let Some(consumer) = self.inner.consumer.lock().take() {
            consumer.abort();
        }
        let released = self.inner.subscriptions.release_all();
        self.inner.metrics.record_unsubscribe(released as u64);
        self.queue().close();
        info!(subscriptions = released, "Bus server shut down");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn link(
        &self,
        connection: &Connection,
        channel: &str,
        kind: LinkKind,
    ) -> Result<bool, BusError> {
        if connection.is_closed() {
            return Err(ConnectionError::Closed.into());
        }

        let linked = self
            .inner
            .subscriptions
            .link(&connection.downgrade(), channel, kind, || {
                self.spawn_forwarder(&connection.downgrade(), self.exchange().subscribe(channel))
            })?;

        if linked {
            self.inner.metrics.record_subscribe();
            // A concurrent disconnect may have released before this link landed.
            if connection.is_closed() {
                let released = self.inner.subscriptions.release(connection.id());
                self.inner.metrics.record_unsubscribe(released as u64);
                return Err(ConnectionError::Closed.into());
            }
        }
        Ok(linked)
    }

    fn spawn_forwarder(
        &self,
        connection: &WeakConnection,
        subscription: ChannelSubscription,
    ) -> Result<AbortHandle, BusError> {
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let task = runtime.spawn(forward(
            Arc::downgrade(&self.inner),
            connection.clone(),
            subscription,
        ));
        Ok(task.abort_handle())
    }

    /// Start a replacement forwarder for every link; returns the old ones.
    fn relink(&self, subscribe: impl Fn(&str) -> ChannelSubscription) -> Vec<AbortHandle> {
        let stale = self
            .inner
            .subscriptions
            .relink(|connection, channel| self.spawn_forwarder(connection, subscribe(channel)));
        if !stale.is_empty() {
            info!(links = stale.len(), "Channel links moved to new pub/sub backend");
        }
        stale
    }

    async fn process_envelope(&self, envelope: Envelope) {
        let message_id = envelope.id;
        let message = match self.inner.processing.receive(Message::new(envelope), None).await {
            Ok(message) => message,
            Err(error) => {
                self.inner.metrics.record_stage(Stage::Processing, false);
                self.report(
                    ErrorReport::new(ErrorSource::Stage(Stage::Processing), error)
                        .with_message(message_id),
                );
                return;
            }
        };
        self.inner.metrics.record_stage(Stage::Processing, true);

        let propagate = match message.disposition() {
            Disposition::Consumed => false,
            Disposition::Deliver => true,
            Disposition::Pending => self.auto_propagate(),
        };
        if !propagate {
            self.inner.metrics.record_consumed();
            debug!(
                message_id = %message.id(),
                disposition = ?message.disposition(),
                "Message not propagated"
            );
            return;
        }

        if let Err(error) = self.publish(message.into_envelope()) {
            self.report(ErrorReport::new(ErrorSource::Exchange, error).with_message(message_id));
        }
    }

    async fn deliver(&self, envelope: Envelope, connection: &Connection) {
        let message_id = envelope.id;
        let message = match self
            .inner
            .outbound
            .receive(Message::new(envelope), Some(connection))
            .await
        {
            Ok(message) => message,
            Err(error) => {
                self.inner.metrics.record_stage(Stage::Outbound, false);
                self.report(
                    ErrorReport::new(ErrorSource::Stage(Stage::Outbound), error)
                        .with_message(message_id)
                        .with_connection(connection.id()),
                );
                return;
            }
        };
        self.inner.metrics.record_stage(Stage::Outbound, true);

        let event = WireEvent::from_envelope(message.envelope());
        match connection.emit(event) {
            Ok(()) => self.inner.metrics.record_delivery(true),
            Err(error) => {
                self.inner.metrics.record_delivery(false);
                self.report(
                    ErrorReport::new(ErrorSource::Delivery, error.into())
                        .with_message(message_id)
                        .with_connection(connection.id()),
                );
            }
        }
    }
}

impl PublishSink for Server {
    fn publish(&self, envelope: Envelope) {
        let message_id = envelope.id;
        if let Err(error) = Server::publish(self, envelope) {
            self.report(ErrorReport::new(ErrorSource::Exchange, error).with_message(message_id));
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("auto_propagate", &self.auto_propagate())
            .field("inbound", &self.inner.inbound)
            .field("processing", &self.inner.processing)
            .field("outbound", &self.inner.outbound)
            .finish_non_exhaustive()
    }
}

/// Drains the exchange queue into the processing stage, one envelope at a time.
///
/// Moves to the new queue whenever the exchange or its queue backend is
/// replaced.
async fn consume(inner: Weak<Inner>, exchange_changed: Arc<Notify>) {
    loop {
        let Some(exchange) = inner.upgrade().map(|inner| inner.exchange()) else {
            break;
        };
        // Subscribe before reading the queue so a swap in between is seen.
        let mut queue_changed = exchange.watch_queue();
        let queue = exchange.queue();
        drop(exchange);

        let envelope = tokio::select! {
            _ = exchange_changed.notified() => {
                debug!("Exchange replaced, switching consumer");
                continue;
            }
            _ = queue_changed.changed() => {
                debug!("Queue replaced, switching consumer");
                continue;
            }
            envelope = queue.next() => envelope,
        };

        let Some(envelope) = envelope else {
            warn!("Processing queue closed, consumer stopping");
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Server { inner }.process_envelope(envelope).await;
    }
}

/// Hands every message on one channel to the outbound stage of one connection.
///
/// Messages the listener lost to channel lag are counted as dropped deliveries
/// and reported once per lag.
async fn forward(
    inner: Weak<Inner>,
    connection: WeakConnection,
    mut subscription: ChannelSubscription,
) {
    while let Some(received) = subscription.recv_event().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let server = Server { inner };

        let envelope = match received {
            Received::Message(envelope) => envelope,
            Received::Lagged(skipped) => {
                server.inner.metrics.record_dropped(skipped);
                warn!(
                    connection_id = %connection.id(),
                    channel = %subscription.channel(),
                    skipped = skipped,
                    "Channel listener lagged, messages dropped"
                );
                server.report(
                    ErrorReport::new(ErrorSource::Delivery, ConnectionError::Saturated.into())
                        .with_connection(connection.id()),
                );
                continue;
            }
        };

        let Some(live) = connection.upgrade() else {
            server.inner.metrics.record_delivery(false);
            server.report(
                ErrorReport::new(ErrorSource::Delivery, ConnectionError::Closed.into())
                    .with_message(envelope.id)
                    .with_connection(connection.id()),
            );
            break;
        };
        server.deliver(envelope, &live).await;
    }
    debug!(
        connection_id = %connection.id(),
        channel = %subscription.channel(),
        "Channel forwarder stopped"
    );
}

/// Builds a [`Server`] from explicit collaborators, defaulting what is not set.
pub struct ServerBuilder {
    config: ServerConfig,
    exchange: Option<Arc<Exchange>>,
    parser: Option<MessageParser>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    metrics: Option<Arc<BusMetrics>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            exchange: None,
            parser: None,
            error_handler: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn exchange(mut self, exchange: Arc<Exchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn parser(mut self, parser: MessageParser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the server and start its queue consumer.
    ///
    /// # Errors
    ///
    /// - `BusError::Config` - the configuration is invalid
    /// - `BusError::NoRuntime` - called outside a Tokio runtime
    pub fn build(self) -> Result<Server, BusError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;

        let parser = self.parser.unwrap_or_default();
        if self.config.accept_unregistered_actions {
            parser.set_accept_unregistered(true);
        }

        let exchange_changed = Arc::new(Notify::new());
        let inner = Arc::new(Inner {
            auto_propagate: AtomicBool::new(self.config.auto_propagate),
            outbound_buffer: self.config.outbound_buffer,
            exchange: RwLock::new(self.exchange.unwrap_or_default()),
            parser,
            inbound: Pipeline::new(Stage::Inbound),
            processing: Pipeline::new(Stage::Processing),
            outbound: Pipeline::new(Stage::Outbound),
            subscriptions: SubscriptionRegistry::new(self.config.max_aliases_per_connection),
            hooks: RwLock::new(Vec::new()),
            error_handler: RwLock::new(self.error_handler.unwrap_or_else(|| Arc::new(LogErrors))),
            metrics: self.metrics.unwrap_or_default(),
            exchange_changed: Arc::clone(&exchange_changed),
            consumer: Mutex::new(None),
        });

        let consumer = runtime.spawn(consume(Arc::downgrade(&inner), exchange_changed));
        *inner.consumer.lock() = Some(consumer);

        info!(
            auto_propagate = self.config.auto_propagate,
            accept_unregistered = self.config.accept_unregistered_actions,
            "Bus server started"
        );
        Ok(Server { inner })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
