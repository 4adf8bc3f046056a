//! Per-connection channel subscriptions.
//!
//! Every channel a connection listens on (its actor channel plus any aliases)
//! is backed by one forwarder task. The registry remembers those tasks so a
//! disconnect can abort all of them at once, and so a pub/sub swap can move
//! every link onto the new backend.

use bus_types::ConnectionId;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::connection::WeakConnection;
use crate::error::BusError;

/// Why a connection listens on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// The connection's own actor channel.
    Actor,
    /// An extra name added with `alias`.
    Alias,
}

#[derive(Debug)]
struct ChannelLink {
    channel: String,
    kind: LinkKind,
    task: AbortHandle,
}

#[derive(Debug)]
struct ConnectionLinks {
    connection: WeakConnection,
    links: Vec<ChannelLink>,
}

/// Channel forwarders grouped by connection.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    links: DashMap<ConnectionId, ConnectionLinks>,
    max_aliases: usize,
}

impl SubscriptionRegistry {
    pub fn new(max_aliases: usize) -> Self {
        Self {
            links: DashMap::new(),
            max_aliases,
        }
    }

    pub fn max_aliases(&self) -> usize {
        self.max_aliases
    }

    /// Record a channel for a connection, starting its forwarder with `spawn`.
    ///
    /// `spawn` only runs when the link is new and within the alias limit.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` - the forwarder was started
    /// - `Ok(false)` - the connection already listens on `channel`
    /// - `Err(BusError::TooManyAliases)` - the alias limit was reached
    pub fn link<F>(
        &self,
        connection: &WeakConnection,
        channel: &str,
        kind: LinkKind,
        spawn: F,
    ) -> Result<bool, BusError>
    where
        F: FnOnce() -> Result<AbortHandle, BusError>,
    {
        let id = connection.id();
        let mut entry = self.links.entry(id).or_insert_with(|| ConnectionLinks {
            connection: connection.clone(),
            links: Vec::new(),
        });
        let links = &mut entry.links;
        if links.iter().any(|link| link.channel == channel) {
            debug!(connection_id = %id, channel = %channel, "Channel already linked");
            return Ok(false);
        }

        if kind == LinkKind::Alias {
            let aliases = links.iter().filter(|l| l.kind == LinkKind::Alias).count();
            if aliases >= self.max_aliases {
                return Err(BusError::TooManyAliases {
                    connection: id,
                    limit: self.max_aliases,
                });
            }
        }

        let task = spawn()?;
        links.push(ChannelLink {
            channel: channel.to_string(),
            kind,
            task,
        });

        debug!(
            connection_id = %id,
            channel = %channel,
            kind = ?kind,
            "Channel linked"
        );
        Ok(true)
    }

    /// Restart every forwarder with `spawn`, keeping channels and kinds.
    ///
    /// Returns the abort handles of the replaced forwarders; the caller aborts
    /// them once the new ones are in place. A link whose `spawn` fails keeps
    /// its old forwarder.
    pub fn relink<F>(&self, mut spawn: F) -> Vec<AbortHandle>
    where
        F: FnMut(&WeakConnection, &str) -> Result<AbortHandle, BusError>,
    {
        let mut replaced = Vec::new();
        for mut entry in self.links.iter_mut() {
            let ConnectionLinks { connection, links } = &mut *entry;
            for link in links.iter_mut() {
                match spawn(connection, &link.channel) {
                    Ok(task) => replaced.push(std::mem::replace(&mut link.task, task)),
                    Err(error) => warn!(
                        connection_id = %connection.id(),
                        channel = %link.channel,
                        error = %error,
                        "Could not move channel link"
                    ),
                }
            }
        }
        debug!(relinked = replaced.len(), "Channel links moved");
        replaced
    }

    /// Abort every forwarder of a connection.
    ///
    /// Returns how many were aborted.
    pub fn release(&self, connection: ConnectionId) -> usize {
        let Some((_, ConnectionLinks { links, .. })) = self.links.remove(&connection) else {
            return 0;
        };
        for link in &links {
            link.task.abort();
        }
        debug!(connection_id = %connection, released = links.len(), "Channels released");
        links.len()
    }

    /// Abort every forwarder of every connection.
    pub fn release_all(&self) -> usize {
        let connections: Vec<_> = self.links.iter().map(|entry| *entry.key()).collect();
        connections.into_iter().map(|id| self.release(id)).sum()
    }

    /// Channels a connection listens on, actor channel first.
    pub fn channels(&self, connection: ConnectionId) -> Vec<String> {
        self.links
            .get(&connection)
            .map(|entry| entry.links.iter().map(|link| link.channel.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_linked(&self, connection: ConnectionId, channel: &str) -> bool {
        self.links
            .get(&connection)
            .is_some_and(|entry| entry.links.iter().any(|link| link.channel == channel))
    }

    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.iter().map(|entry| entry.links.len()).sum()
    }
}
