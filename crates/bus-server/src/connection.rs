//! Live client sessions as seen by the bus.
//!
//! A [`Connection`] is a cheap clonable handle. The transport owns the
//! receiving half of its outbox and writes every [`WireEvent`] to the socket;
//! the bus only ever calls [`Connection::emit`].

use bus_types::{ConnectionId, WireEvent};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::ConnectionError;

/// Default number of events buffered per connection.
pub const DEFAULT_OUTBOX_SIZE: usize = 256;

/// Data captured when the connection was established.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// Peer address, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
    /// Query string parameters of the upgrade request.
    pub query: HashMap<String, String>,
}

impl Handshake {
    pub fn new(remote_addr: Option<SocketAddr>, query: HashMap<String, String>) -> Self {
        Self { remote_addr, query }
    }

    /// Look up a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

struct Inner {
    id: ConnectionId,
    handshake: Handshake,
    outbox: mpsc::Sender<WireEvent>,
    closed: watch::Sender<bool>,
}

/// Handle on one client session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a connection with a fresh id.
    ///
    /// Returns the handle and the receiving half of its outbox.
    pub fn new(handshake: Handshake, buffer: usize) -> (Self, mpsc::Receiver<WireEvent>) {
        Self::with_id(ConnectionId::new(), handshake, buffer)
    }

    pub fn with_id(
        id: ConnectionId,
        handshake: Handshake,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<WireEvent>) {
        let (outbox, receiver) = mpsc::channel(buffer.max(1));
        let (closed, _) = watch::channel(false);
        let connection = Self {
            inner: Arc::new(Inner {
                id,
                handshake,
                outbox,
                closed,
            }),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn handshake(&self) -> &Handshake {
        &self.inner.handshake
    }

    /// Queue one event for the client.
    ///
    /// Never waits: a full outbox drops the event with
    /// [`ConnectionError::Saturated`].
    pub fn emit(&self, event: WireEvent) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.inner.outbox.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::Saturated,
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Mark the connection closed.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let was_open = !self.inner.closed.send_replace(true);
        if was_open {
            debug!(connection_id = %self.inner.id, "Connection closed");
        }
        was_open
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        // The sender lives as long as `self`, so this only returns on close.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// A handle that does not keep the connection alive.
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

/// Non-owning connection handle held by channel forwarders.
#[derive(Clone)]
pub struct WeakConnection {
    id: ConnectionId,
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The connection, if it is still alive and open.
    pub fn upgrade(&self) -> Option<Connection> {
        let inner = self.inner.upgrade()?;
        let connection = Connection { inner };
        (!connection.is_closed()).then_some(connection)
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
