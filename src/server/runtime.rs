//! Runtime control for [`MuxServer`].

mod accept;
mod backoff;

use std::sync::Arc;

use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{net::TcpStream, select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    Bound,
    MuxServer,
    ServerError,
    backend::{BackendLink, run_backend_link},
    client::ClientOptions,
};
use crate::{
    mux::Multiplexer,
    sink::{ChannelSink, SinkPolicy},
};

impl MuxServer<Bound> {
    /// Run the server until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// As for [`MuxServer::run_with_shutdown`].
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until `shutdown` resolves or the backend link ends.
    ///
    /// Connects to the backend first, then accepts clients. On shutdown the
    /// accept loop stops, every client task emits its DOWN, and the backend
    /// link flushes the remaining events before closing.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Backend`] if the backend cannot be reached and
    /// [`ServerError::Config`] if the backend sink cannot be built. Accept
    /// failures are retried with back-off and never surface here.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let MuxServer {
            backend_addr,
            buffer_size,
            sink_capacity,
            client_send_timeout,
            codec,
            backoff,
            ready_tx,
            state: Bound { listener },
        } = self;

        let stream = TcpStream::connect(backend_addr)
            .await
            .map_err(ServerError::Backend)?;
        let (backend_sink, backend_events) = ChannelSink::builder()
            .capacity(sink_capacity)
            .policy(SinkPolicy::Block)
            .build()?;
        let mux = Arc::new(Multiplexer::new(Arc::new(backend_sink)));
        info!("backend link established: backend_addr={backend_addr}");

        let server_shutdown = CancellationToken::new();
        let link_shutdown = CancellationToken::new();
        let link = tokio::spawn(run_backend_link(BackendLink {
            stream,
            mux: Arc::clone(&mux),
            events: backend_events,
            codec,
            server_shutdown: server_shutdown.clone(),
            link_shutdown: link_shutdown.clone(),
        }));

        let tracker = TaskTracker::new();
        tracker.spawn(accept_loop(
            listener,
            Arc::clone(&mux),
            AcceptLoopOptions {
                client: ClientOptions {
                    buffer_size,
                    sink_capacity,
                    send_timeout: client_send_timeout,
                },
                shutdown: server_shutdown.clone(),
                tracker: tracker.clone(),
                backoff,
            },
        ));

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => {},
            () = server_shutdown.cancelled() => {},
        }
        server_shutdown.cancel();

        tracker.close();
        tracker.wait().await;
        let closed = mux.close_all().await;
        if closed > 0 {
            info!("closed remaining connections at shutdown: count={closed}");
        }

        link_shutdown.cancel();
        if let Err(e) = link.await {
            warn!("backend link task failed: error={e}");
        }
        Ok(())
    }
}
