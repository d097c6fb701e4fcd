//! Tokio TCP runtime for the multiplexer.
//!
//! `MuxServer` accepts client connections on a local listener and relays
//! them over a single TCP connection to the backend. Each client runs in its
//! own task; one further task owns the backend link. The server typestate
//! `S` tracks whether a listener has been bound: [`Unbound`] servers must call
//! [`MuxServer::bind`] or [`MuxServer::bind_listener`] before running.

mod backend;
mod client;
mod error;
mod runtime;

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

pub use error::ServerError;
pub use runtime::BackoffConfig;
use tokio::{net::TcpListener, sync::oneshot};

use crate::{
    frame::FRAME_HEADER_LEN,
    link::{DEFAULT_MESSAGE_LENGTH, LinkCodec},
};

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
const DEFAULT_SINK_CAPACITY: usize = 64;
const DEFAULT_CLIENT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

impl ServerState for Unbound {}
impl ServerState for Bound {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

/// Multiplexing proxy server.
///
/// # Examples
///
/// ```no_run
/// use wiremux::server::MuxServer;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), wiremux::server::ServerError> {
/// let server = MuxServer::new(([127, 0, 0, 1], 9000).into())
///     .sink_capacity(128)
///     .bind(([127, 0, 0, 1], 8080).into())?;
/// server.run().await
/// # }
/// ```
pub struct MuxServer<S: ServerState = Unbound> {
    pub(crate) backend_addr: SocketAddr,
    pub(crate) buffer_size: usize,
    pub(crate) sink_capacity: usize,
    pub(crate) client_send_timeout: Duration,
    pub(crate) codec: LinkCodec,
    pub(crate) backoff: BackoffConfig,
    /// Single-use readiness notification, sent once workers are running.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

impl MuxServer<Unbound> {
    /// Create a server that will relay clients to `backend_addr`.
    #[must_use]
    pub fn new(backend_addr: SocketAddr) -> Self {
        Self {
            backend_addr,
            buffer_size: DEFAULT_BUFFER_SIZE,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            client_send_timeout: DEFAULT_CLIENT_SEND_TIMEOUT,
            codec: LinkCodec::new(DEFAULT_MESSAGE_LENGTH),
            backoff: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Unbound servers have no address.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }
}

impl<S: ServerState> MuxServer<S> {
    /// Largest chunk read from a client socket in one go.
    ///
    /// Clamped so every chunk fits in one link message.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.clamp(1, self.codec.max_message_length() - FRAME_HEADER_LEN);
        self
    }

    /// Capacity of the backend sink and of each client sink.
    #[must_use]
    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity.max(1);
        self
    }

    /// How long delivery to a full client sink may wait.
    ///
    /// A client that stays full for longer is closed with DOWN, so one slow
    /// reader holds up backend traffic for other clients by at most this
    /// long. Clamped to at least 1 ms.
    #[must_use]
    pub fn client_send_timeout(mut self, timeout: Duration) -> Self {
        self.client_send_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Largest link message body accepted from or sent to the backend.
    #[must_use]
    pub fn max_message_length(mut self, length: usize) -> Self {
        self.codec = LinkCodec::new(length);
        self.buffer_size = self
            .buffer_size
            .min(self.codec.max_message_length() - FRAME_HEADER_LEN);
        self
    }

    /// Back-off applied when accepting a client fails.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Configure a channel used to signal when the server is ready.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Address of the backend this server relays to.
    #[must_use]
    pub const fn backend_addr(&self) -> SocketAddr { self.backend_addr }

    /// Bind a fresh listener on `addr`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub fn bind(self, addr: SocketAddr) -> Result<MuxServer<Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_listener(std_listener)
    }

    /// Adopt an already bound standard library listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be registered
    /// with the runtime.
    pub fn bind_listener(self, std_listener: StdTcpListener) -> Result<MuxServer<Bound>, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        Ok(MuxServer {
            backend_addr: self.backend_addr,
            buffer_size: self.buffer_size,
            sink_capacity: self.sink_capacity,
            client_send_timeout: self.client_send_timeout,
            codec: self.codec,
            backoff: self.backoff,
            ready_tx: self.ready_tx,
            state: Bound {
                listener: Arc::new(listener),
            },
        })
    }
}

impl MuxServer<Bound> {
    /// Address the client listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }
}
