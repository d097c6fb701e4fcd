//! Events emitted by the multiplexer to its sinks.

use bytes::Bytes;

use crate::{
    command::{Command, Verb},
    registry::ConnectionId,
};

/// Which side of the multiplexer produced a data payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// Bytes sent by the backend to a client.
    FromBackend,
    /// Bytes received from a client, bound for the backend.
    FromClient,
}

/// Lifecycle notification for one connection.
pub type CommandEvent = Command;

/// Payload relayed for one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataEvent {
    /// Origin of the payload.
    pub source: Source,
    /// Connection the payload belongs to.
    pub id: ConnectionId,
    /// Relayed bytes, possibly empty.
    pub payload: Bytes,
}

/// Everything a sink can receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An UP or DOWN notification.
    Command(CommandEvent),
    /// A relayed payload.
    Data(DataEvent),
}

impl Event {
    /// Build an UP notification.
    #[must_use]
    pub fn up(id: ConnectionId) -> Self { Self::Command(Command::up(id)) }

    /// Build a DOWN notification.
    #[must_use]
    pub fn down(id: ConnectionId) -> Self { Self::Command(Command::down(id)) }

    /// Build a data event.
    #[must_use]
    pub fn data(source: Source, id: ConnectionId, payload: impl Into<Bytes>) -> Self {
        Self::Data(DataEvent {
            source,
            id,
            payload: payload.into(),
        })
    }

    /// Connection the event refers to.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Command(cmd) => cmd.id,
            Self::Data(data) => data.id,
        }
    }

    /// Returns the lifecycle verb for command events.
    #[must_use]
    pub fn verb(&self) -> Option<Verb> {
        match self {
            Self::Command(cmd) => Some(cmd.verb),
            Self::Data(_) => None,
        }
    }
}
