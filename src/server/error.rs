//! Errors raised by [`MuxServer`](super::MuxServer) operations.

use std::io;

use thiserror::Error;

use crate::sink::SinkConfigError;

/// Errors that may occur while setting up or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the client listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// Connecting to the backend failed.
    #[error("backend connect error: {0}")]
    Backend(#[source] io::Error),
    /// The backend sink could not be built.
    #[error("invalid configuration: {0}")]
    Config(#[from] SinkConfigError),
}
