//! # Frame Parser
//!
//! Turns raw `(action, ...args)` frames into envelopes.
//!
//! - The actor comes from an [`ActorResolver`] (default: the connection id).
//! - The target comes from a [`TargetResolver`] (default: none). A resolver
//!   may consume args, e.g. pop the last one as the destination.
//! - Whatever args remain become the envelope content.

use bus_types::{Envelope, InboundFrame};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::connection::Connection;
use crate::error::BusError;

/// Names the sender of a connection's messages.
pub trait ActorResolver: Send + Sync {
    fn resolve(&self, connection: &Connection) -> Result<String, BusError>;
}

/// Picks the destination of a frame, possibly consuming some of its args.
pub trait TargetResolver: Send + Sync {
    fn resolve(
        &self,
        connection: &Connection,
        frame: &mut InboundFrame,
    ) -> Result<Option<String>, BusError>;
}

/// Uses the connection id as the actor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionIdActor;

impl ActorResolver for ConnectionIdActor {
    fn resolve(&self, connection: &Connection) -> Result<String, BusError> {
        Ok(connection.id().to_string())
    }
}

/// Never sets a target.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTarget;

impl TargetResolver for NoTarget {
    fn resolve(&self, _: &Connection, _: &mut InboundFrame) -> Result<Option<String>, BusError> {
        Ok(None)
    }
}

pub struct ActorFn<F>(F);

impl<F> ActorResolver for ActorFn<F>
where
    F: Fn(&Connection) -> Result<String, BusError> + Send + Sync,
{
    fn resolve(&self, connection: &Connection) -> Result<String, BusError> {
        (self.0)(connection)
    }
}

pub struct TargetFn<F>(F);

impl<F> TargetResolver for TargetFn<F>
where
    F: Fn(&Connection, &mut InboundFrame) -> Result<Option<String>, BusError> + Send + Sync,
{
    fn resolve(
        &self,
        connection: &Connection,
        frame: &mut InboundFrame,
    ) -> Result<Option<String>, BusError> {
        (self.0)(connection, frame)
    }
}

/// Actor resolver from a closure.
pub fn actor_fn<F>(f: F) -> ActorFn<F>
where
    F: Fn(&Connection) -> Result<String, BusError> + Send + Sync,
{
    ActorFn(f)
}

/// Target resolver from a closure.
pub fn target_fn<F>(f: F) -> TargetFn<F>
where
    F: Fn(&Connection, &mut InboundFrame) -> Result<Option<String>, BusError> + Send + Sync,
{
    TargetFn(f)
}

/// Action registry plus actor/target resolution.
pub struct MessageParser {
    actions: RwLock<HashSet<String>>,
    accept_unregistered: AtomicBool,
    actor: RwLock<Arc<dyn ActorResolver>>,
    target: RwLock<Arc<dyn TargetResolver>>,
}

impl MessageParser {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashSet::new()),
            accept_unregistered: AtomicBool::new(false),
            actor: RwLock::new(Arc::new(ConnectionIdActor)),
            target: RwLock::new(Arc::new(NoTarget)),
        }
    }

    /// Allow frames for `action` through.
    pub fn register_action(&self, action: impl Into<String>) {
        let action = action.into();
        debug!(action = %action, "Action registered");
        self.actions.write().insert(action);
    }

    pub fn is_recognized(&self, action: &str) -> bool {
        self.accepts_unregistered() || self.actions.read().contains(action)
    }

    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<_> = self.actions.read().iter().cloned().collect();
        actions.sort();
        actions
    }

    pub fn accepts_unregistered(&self) -> bool {
        self.accept_unregistered.load(Ordering::Relaxed)
    }

    pub fn set_accept_unregistered(&self, accept: bool) {
        self.accept_unregistered.store(accept, Ordering::Relaxed);
    }

    pub fn actor_resolver(&self) -> Arc<dyn ActorResolver> {
        self.actor.read().clone()
    }

    pub fn set_actor_resolver(&self, resolver: Arc<dyn ActorResolver>) {
        *self.actor.write() = resolver;
    }

    pub fn target_resolver(&self) -> Arc<dyn TargetResolver> {
        self.target.read().clone()
    }

    pub fn set_target_resolver(&self, resolver: Arc<dyn TargetResolver>) {
        *self.target.write() = resolver;
    }

    pub fn resolve_actor(&self, connection: &Connection) -> Result<String, BusError> {
        self.actor_resolver().resolve(connection)
    }

    /// Hydrate a frame into an unpublished envelope.
    pub fn parse(
        &self,
        connection: &Connection,
        mut frame: InboundFrame,
    ) -> Result<Envelope, BusError> {
        if !self.is_recognized(&frame.action) {
            return Err(BusError::UnrecognizedAction(frame.action));
        }

        let actor = self.resolve_actor(connection)?;
        let target = self.target_resolver().resolve(connection, &mut frame)?;

        let mut envelope = Envelope::new(frame.action, actor, frame.args);
        envelope.target = target;
        Ok(envelope)
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}
