//! Registry of active client connections.
//!
//! `ConnectionRegistry` hands out connection identifiers and keeps the state
//! of every connection that has not yet completed its DOWN transition.
//! Identifiers come from a monotonically increasing counter starting at 1 and
//! are never reused. Map access is sharded by `DashMap`; each connection also
//! carries an async mutex over its lifecycle state so that emissions for one
//! identifier are serialised.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{MuxError, Result},
    sink::EventSink,
};

/// Identifier assigned to a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, UP not yet emitted.
    Connecting,
    /// UP emitted; data may flow.
    Up,
    /// DOWN emitted. Terminal.
    Down,
}

/// A registered client connection.
///
/// Holds the client's event sink (where backend data is delivered) and a
/// token that is cancelled when the multiplexer wants the client's socket
/// closed.
pub struct Connection {
    id: ConnectionId,
    state: Mutex<ConnectionState>,
    client: Arc<dyn EventSink>,
    closed: CancellationToken,
}

impl Connection {
    fn new(id: ConnectionId, client: Arc<dyn EventSink>) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState::Connecting),
            client,
            closed: CancellationToken::new(),
        }
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Snapshot of the current lifecycle state.
    pub async fn state(&self) -> ConnectionState { *self.state.lock().await }

    /// Token cancelled when the client should be disconnected.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken { self.closed.clone() }

    pub(crate) fn client(&self) -> &Arc<dyn EventSink> { &self.client }

    /// Lock the lifecycle state for the duration of a transition or emission.
    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Concurrent registry of live connections keyed by [`ConnectionId`].
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
        }
    }
}

impl ConnectionRegistry {
    /// Create an empty registry whose first identifier will be 1.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Reserve the next identifier for a newly accepted client.
    ///
    /// The connection starts in [`ConnectionState::Connecting`]. Identifiers
    /// are issued in call order and are strictly increasing.
    pub fn register(&self, client: Arc<dyn EventSink>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.connections
            .insert(id, Arc::new(Connection::new(id, client)));
        id
    }

    /// Look up a registered connection.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::UnknownConnection`] if `id` is not registered.
    pub fn get(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.connections
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(MuxError::UnknownConnection(id))
    }

    /// Remove a connection after its DOWN transition.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::UnknownConnection`] if `id` is not registered.
    pub fn release(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.connections
            .remove(&id)
            .map(|(_, connection)| connection)
            .ok_or(MuxError::UnknownConnection(id))
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.connections.len() }

    /// Returns true when no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    /// Identifiers of every registered connection in ascending order.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }
}
