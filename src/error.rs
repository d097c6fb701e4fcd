//! Canonical error and result types for the crate.
//!
//! Each codec and the sink layer define their own error enums; [`MuxError`]
//! folds them into the single surface returned by the multiplexer core.

use std::io;

use thiserror::Error;

use crate::{
    command::{Command, CommandError},
    frame::FrameError,
    registry::ConnectionId,
    sink::SinkError,
};

/// Top-level error type exposed by `wiremux`.
///
/// Every variant is local to the message or connection that produced it; none
/// of them tears down the multiplexer.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The identifier is not registered, or its connection is no longer UP.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// A command line failed to parse.
    #[error("malformed command: {0}")]
    MalformedCommand(#[from] CommandError),
    /// A data frame or link message failed to parse.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),
    /// Socket-level failure, isolated to one connection or the backend link.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The sink refused or could not accept an event.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    /// A well-formed command that the receiving side does not accept.
    #[error("unexpected command `{0}`")]
    UnexpectedCommand(Command),
}

impl MuxError {
    /// Returns true if the error names a connection that is not UP.
    #[must_use]
    pub fn is_unknown_connection(&self) -> bool { matches!(self, Self::UnknownConnection(_)) }
}

/// Canonical result alias used by `wiremux` public APIs.
pub type Result<T> = std::result::Result<T, MuxError>;
