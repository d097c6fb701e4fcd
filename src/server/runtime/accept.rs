//! Accept loop feeding new clients to the multiplexer.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::{
    mux::Multiplexer,
    server::client::{ClientOptions, admit_client},
};

/// Source of incoming client connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

#[derive(Debug)]
pub(in crate::server) struct AcceptLoopOptions {
    pub client: ClientOptions,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accept clients until `shutdown` is cancelled.
///
/// Each accepted stream is registered before the next accept, so
/// identifiers follow accept order, then gets its own task tracked by
/// `tracker`. Accept failures are logged and retried after an exponentially
/// growing delay.
pub(in crate::server) async fn accept_loop<L>(
    listener: Arc<L>,
    mux: Arc<Multiplexer>,
    options: AcceptLoopOptions,
) where
    L: AcceptListener + 'static,
{
    let backoff = options.backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) = accept_iteration(&*listener, &mux, &options, &backoff, delay).await
    {
        delay = next_delay;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L: AcceptListener>(
    listener: &L,
    mux: &Arc<Multiplexer>,
    options: &AcceptLoopOptions,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration> {
    select! {
        biased;

        () = options.shutdown.cancelled() => None,
        res = listener.accept() => match res {
            Ok((stream, peer_addr)) => {
                admit_client(
                    stream,
                    peer_addr,
                    mux,
                    options.client,
                    options.shutdown.clone(),
                    &options.tracker,
                )
                .await;
                Some(backoff.initial_delay)
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}, retry_in={delay:?}");
                crate::metrics::inc_errors();
                select! {
                    () = options.shutdown.cancelled() => None,
                    () = sleep(delay) => Some(backoff.next_delay(delay)),
                }
            }
        },
    }
}
