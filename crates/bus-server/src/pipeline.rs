//! # Pipeline Stages
//!
//! An ordered chain of [`Middleware`] applied to one message at a time.
//!
//! ## Semantics
//!
//! - Middleware run in registration order, each exactly once per message.
//! - Returning `Err` aborts the chain; the remaining middleware are skipped.
//! - A run works on a snapshot of the chain, so registering middleware while
//!   messages are in flight only affects later messages.
//! - A middleware future that never resolves stalls that message (and
//!   everything queued behind it on the same stream).

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, debug_span, Instrument};

use crate::connection::Connection;
use crate::error::BusError;
use crate::message::Message;

/// The three places a message can be transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// From a client connection, before the message is built.
    Inbound,
    /// On the bus, between the queue and channel publication.
    Processing,
    /// From a channel, before emitting to a connection.
    Outbound,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Inbound => "inbound",
            Stage::Processing => "processing",
            Stage::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a pipeline stage.
///
/// `connection` is the client the message came from (inbound) or is going to
/// (outbound); processing runs without one.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        message: &mut Message,
        connection: Option<&Connection>,
    ) -> Result<(), BusError>;
}

/// Middleware from a synchronous closure.
pub struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Message, Option<&Connection>) -> Result<(), BusError> + Send + Sync,
{
    async fn handle(
        &self,
        message: &mut Message,
        connection: Option<&Connection>,
    ) -> Result<(), BusError> {
        (self.f)(message, connection)
    }
}

/// Wrap a closure as middleware.
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut Message, Option<&Connection>) -> Result<(), BusError> + Send + Sync,
{
    FnMiddleware { f }
}

/// Runs the wrapped middleware only for one action name.
pub struct ActionFilter {
    action: String,
    inner: Arc<dyn Middleware>,
}

impl ActionFilter {
    pub fn new(action: impl Into<String>, inner: Arc<dyn Middleware>) -> Self {
        Self {
            action: action.into(),
            inner,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

#[async_trait]
impl Middleware for ActionFilter {
    async fn handle(
        &self,
        message: &mut Message,
        connection: Option<&Connection>,
    ) -> Result<(), BusError> {
        if message.action() != self.action {
            return Ok(());
        }
        self.inner.handle(message, connection).await
    }
}

type Chain = Arc<Vec<Arc<dyn Middleware>>>;

/// An ordered, shared middleware chain.
pub struct Pipeline {
    stage: Stage,
    chain: RwLock<Chain>,
}

impl Pipeline {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            chain: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Append middleware to the end of the chain.
    pub fn use_middleware(&self, middleware: impl Middleware + 'static) -> &Self {
        self.push(Arc::new(middleware))
    }

    /// Append middleware that only runs for `action`.
    pub fn use_action(
        &self,
        action: impl Into<String>,
        middleware: impl Middleware + 'static,
    ) -> &Self {
        self.push(Arc::new(ActionFilter::new(action, Arc::new(middleware))))
    }

    /// Append an already shared middleware.
    pub fn push(&self, middleware: Arc<dyn Middleware>) -> &Self {
        let mut chain = self.chain.write();
        Arc::make_mut(&mut *chain).push(middleware);
        debug!(stage = %self.stage, len = chain.len(), "Middleware registered");
        self
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run a message through the whole chain.
    ///
    /// # Returns
    ///
    /// - `Ok(message)` - every middleware completed
    /// - `Err(error)` - the first middleware error; later ones did not run
    pub async fn receive(
        &self,
        mut message: Message,
        connection: Option<&Connection>,
    ) -> Result<Message, BusError> {
        let chain = self.chain.read().clone();
        let span = debug_span!(
            "pipeline",
            stage = %self.stage,
            action = %message.action(),
            message_id = %message.id(),
        );

        async move {
            for (index, middleware) in chain.iter().enumerate() {
                if let Err(error) = middleware.handle(&mut message, connection).await {
                    debug!(index = index, error = %error, "Middleware aborted chain");
                    return Err(error);
                }
            }
            debug!(steps = chain.len(), "Message received");
            Ok(message)
        }
        .instrument(span)
        .await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stage", &self.stage)
            .field("len", &self.len())
            .finish()
    }
}
