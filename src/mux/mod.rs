//! Multiplexer core wiring many clients onto one backend sink.
//!
//! [`Multiplexer`] owns the [`ConnectionRegistry`] and drives each
//! connection through CONNECTING → UP → DOWN. Every emission for a connection
//! happens while that connection's state lock is held, so for a single
//! identifier the backend observes UP, then data in call order, then at most
//! one DOWN. Nothing is promised across identifiers.
//!
//! Errors are local to the call that produced them: a malformed backend
//! message, an unknown identifier or a failed client write never affects
//! other connections.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;

use crate::{
    command::{self, Command, Verb},
    error::{MuxError, Result},
    event::{Event, Source},
    frame::{self, FrameError},
    link::LinkMessage,
    metrics::{self, Direction},
    registry::{Connection, ConnectionId, ConnectionRegistry, ConnectionState},
    sink::EventSink,
};

#[cfg(test)]
mod tests;

/// Handle returned to the task that owns a newly accepted client.
#[derive(Clone, Debug)]
pub struct ClientSession {
    /// Identifier announced to the backend.
    pub id: ConnectionId,
    /// Cancelled when the multiplexer wants the client's socket closed.
    pub closed: CancellationToken,
}

/// Fans client connections into a single backend sink and back.
pub struct Multiplexer {
    registry: ConnectionRegistry,
    backend: Arc<dyn EventSink>,
}

fn fail(err: impl Into<MuxError>) -> MuxError {
    metrics::inc_errors();
    err.into()
}

fn ensure_up(id: ConnectionId, state: ConnectionState) -> Result<()> {
    if state == ConnectionState::Up {
        Ok(())
    } else {
        Err(fail(MuxError::UnknownConnection(id)))
    }
}

impl Multiplexer {
    /// Create a multiplexer emitting lifecycle commands and client data to
    /// `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn EventSink>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            backend,
        }
    }

    /// Registry of live connections.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry { &self.registry }

    fn lookup(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.registry.get(id).map_err(fail)
    }

    /// Register a newly accepted client and announce it with `UP`.
    ///
    /// `client` receives the backend's data for this connection. The
    /// identifier is returned only once UP has been emitted, so no data event
    /// for it can precede UP.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Sink`] if the backend sink rejects UP. The
    /// identifier is then released without a DOWN.
    pub async fn on_client_connected(&self, client: Arc<dyn EventSink>) -> Result<ClientSession> {
        let id = self.registry.register(client);
        let connection = self.lookup(id)?;
        let mut state = connection.lock_state().await;

        if let Err(err) = self.backend.emit(Event::up(id)).await {
            *state = ConnectionState::Down;
            connection.closed_token().cancel();
            if let Err(release) = self.registry.release(id) {
                warn!("release after failed up: id={id}, error={release}");
            }
            warn!("connection up failed: id={id}, error={err}");
            return Err(fail(err));
        }
        *state = ConnectionState::Up;
        drop(state);

        metrics::inc_connections();
        info!(
            "connection up: id={id}, wiremux_active_connections={}",
            self.registry.len()
        );
        Ok(ClientSession {
            id,
            closed: connection.closed_token(),
        })
    }

    /// Forward bytes read from a client to the backend sink.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::UnknownConnection`] if `id` is not UP and
    /// [`MuxError::Sink`] if the backend sink rejects the event.
    pub async fn on_client_data(&self, id: ConnectionId, payload: Bytes) -> Result<()> {
        let connection = self.lookup(id)?;
        let state = connection.lock_state().await;
        ensure_up(id, *state)?;
        self.backend
            .emit(Event::data(Source::FromClient, id, payload))
            .await
            .map_err(fail)?;
        drop(state);
        metrics::inc_frames(Direction::ToBackend);
        Ok(())
    }

    /// Deliver backend bytes to the client identified by `id`.
    ///
    /// Any delivery failure on the client sink (closed, full or timed out)
    /// is a write failure and drives the connection to DOWN before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::UnknownConnection`] if `id` is not UP, whether it
    /// was never issued or has already gone DOWN, and [`MuxError::Sink`] if
    /// the client sink rejects the event. If the DOWN emission itself fails
    /// that error is returned instead.
    pub async fn send_to_client(&self, id: ConnectionId, payload: Bytes) -> Result<()> {
        let connection = self.lookup(id)?;
        let state = connection.lock_state().await;
        ensure_up(id, *state)?;
        match connection
            .client()
            .emit(Event::data(Source::FromBackend, id, payload))
            .await
        {
            Ok(()) => {
                drop(state);
                metrics::inc_frames(Direction::ToClient);
                Ok(())
            }
            Err(err) => {
                // The client's stream now has a gap; it must not stay UP.
                warn!("client write failed: id={id}, error={err}");
                self.go_down(&connection, state).await?;
                Err(fail(err))
            }
        }
    }

    /// Handle a client disconnect by emitting `DOWN` and releasing its id.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::UnknownConnection`] if `id` is not UP. If the
    /// backend sink rejects DOWN the connection is still released and
    /// [`MuxError::Sink`] is returned.
    pub async fn on_client_disconnected(&self, id: ConnectionId) -> Result<()> {
        let connection = self.lookup(id)?;
        let state = connection.lock_state().await;
        ensure_up(id, *state)?;
        self.go_down(&connection, state).await
    }

    /// Close a client at the backend's request.
    ///
    /// Cancels the client's session token and performs the DOWN transition.
    ///
    /// # Errors
    ///
    /// As for [`Multiplexer::on_client_disconnected`].
    pub async fn close_client(&self, id: ConnectionId) -> Result<()> {
        debug!("closing client: id={id}");
        self.on_client_disconnected(id).await
    }

    /// Close every UP connection, returning how many went DOWN.
    ///
    /// Connections still CONNECTING are skipped; their accept path finishes
    /// on its own.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for id in self.registry.active_ids() {
            match self.close_client(id).await {
                Ok(()) => closed += 1,
                Err(MuxError::UnknownConnection(_)) => {}
                Err(err) => {
                    closed += 1;
                    warn!("close during shutdown failed: id={id}, error={err}");
                }
            }
        }
        closed
    }

    /// Decode a data frame from the backend and deliver it to its client.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::MalformedFrame`] for undecodable input, otherwise
    /// as for [`Multiplexer::send_to_client`].
    pub async fn handle_backend_frame(&self, frame: Bytes) -> Result<()> {
        let (id, payload) = frame::decode(frame).map_err(fail)?;
        self.send_to_client(id, payload).await
    }

    /// Apply a command line received from the backend.
    ///
    /// `DOWN` closes the named client. The backend cannot open connections,
    /// so `UP` is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::MalformedCommand`] for unparsable text,
    /// [`MuxError::UnexpectedCommand`] for `UP`, otherwise as for
    /// [`Multiplexer::close_client`].
    pub async fn handle_backend_command(&self, text: &str) -> Result<()> {
        let cmd = command::decode(text).map_err(fail)?;
        match cmd.verb {
            Verb::Down => self.close_client(cmd.id).await,
            Verb::Up => Err(fail(MuxError::UnexpectedCommand(cmd))),
        }
    }

    /// Dispatch one message read from the backend link.
    ///
    /// # Errors
    ///
    /// As for [`Multiplexer::handle_backend_command`] and
    /// [`Multiplexer::handle_backend_frame`].
    pub async fn handle_backend_message(&self, message: LinkMessage) -> Result<()> {
        match message {
            LinkMessage::Command(line) => {
                let text = std::str::from_utf8(&line).map_err(|_| fail(FrameError::InvalidUtf8))?;
                self.handle_backend_command(text).await
            }
            LinkMessage::Data(frame) => self.handle_backend_frame(frame).await,
        }
    }

    /// Emit DOWN, mark the connection terminal and release its id.
    async fn go_down(
        &self,
        connection: &Connection,
        mut state: MutexGuard<'_, ConnectionState>,
    ) -> Result<()> {
        let id = connection.id();
        let emitted = self.backend.emit(Event::Command(Command::down(id))).await;
        *state = ConnectionState::Down;
        connection.closed_token().cancel();
        self.registry.release(id).map_err(fail)?;
        drop(state);

        metrics::dec_connections();
        info!(
            "connection down: id={id}, wiremux_active_connections={}",
            self.registry.len()
        );
        emitted.map_err(fail)
    }
}
