//! Per-client connection task.
//!
//! Each accepted socket is registered with the multiplexer on the accept
//! loop, then a single task relays bytes in both directions until the client
//! closes, a socket operation fails, the backend closes the connection, or
//! the server shuts down. Whatever ends the loop, the task finishes with the
//! DOWN transition.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use log::{debug, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, tcp::OwnedWriteHalf},
    select,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{DEFAULT_BUFFER_SIZE, DEFAULT_CLIENT_SEND_TIMEOUT, DEFAULT_SINK_CAPACITY};
use crate::{
    error::{MuxError, Result},
    event::Event,
    mux::{ClientSession, Multiplexer},
    sink::{ChannelSink, EventReceiver, SinkPolicy},
};

/// Sizing applied to every client task.
#[derive(Clone, Copy, Debug)]
pub(in crate::server) struct ClientOptions {
    pub buffer_size: usize,
    pub sink_capacity: usize,
    pub send_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            send_timeout: DEFAULT_CLIENT_SEND_TIMEOUT,
        }
    }
}

/// Register an accepted client and spawn its relay task.
///
/// Runs on the accept loop so identifiers follow accept order. A client
/// whose UP cannot be emitted is dropped.
pub(in crate::server) async fn admit_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    mux: &Arc<Multiplexer>,
    options: ClientOptions,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    let (sink, events) = match ChannelSink::builder()
        .capacity(options.sink_capacity)
        .policy(SinkPolicy::Block)
        .send_timeout(Some(options.send_timeout))
        .build()
    {
        Ok(pair) => pair,
        Err(e) => {
            warn!("client sink rejected: error={e}, peer_addr={peer_addr}");
            return;
        }
    };
    let session = match mux.on_client_connected(Arc::new(sink)).await {
        Ok(session) => session,
        Err(e) => {
            warn!("client up failed: error={e}, peer_addr={peer_addr}");
            return;
        }
    };
    debug!("client accepted: id={}, peer_addr={peer_addr}", session.id);

    let mux = Arc::clone(mux);
    tracker.spawn(async move {
        let outcome = serve_client(
            stream,
            &mux,
            session,
            events,
            options.buffer_size,
            &shutdown,
        )
        .await;
        if let Err(e) = outcome {
            warn!("client connection ended with error: error={e}, peer_addr={peer_addr}");
        }
    });
}

async fn serve_client(
    stream: TcpStream,
    mux: &Multiplexer,
    session: ClientSession,
    events: EventReceiver,
    buffer_size: usize,
    shutdown: &CancellationToken,
) -> Result<()> {
    let outcome = relay(stream, mux, &session, events, buffer_size, shutdown).await;

    match mux.on_client_disconnected(session.id).await {
        // Already DOWN: the backend closed it or a write to it failed.
        Ok(()) | Err(MuxError::UnknownConnection(_)) => {}
        Err(e) => warn!("client down failed: id={}, error={e}", session.id),
    }
    outcome
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn relay(
    stream: TcpStream,
    mux: &Multiplexer,
    session: &ClientSession,
    mut events: EventReceiver,
    buffer_size: usize,
    shutdown: &CancellationToken,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0_u8; buffer_size];

    let outcome = loop {
        select! {
            biased;

            () = session.closed.cancelled() => break Ok(()),
            () = shutdown.cancelled() => break Ok(()),
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = write_event(&mut writer, event).await {
                        break Err(e.into());
                    }
                }
                None => break Ok(()),
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("client closed: id={}", session.id);
                    break Ok(());
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(buf.get(..n).unwrap_or_default());
                    if let Err(e) = mux.on_client_data(session.id, chunk).await {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e.into()),
            },
        }
    };

    // Deliver whatever the backend queued before the connection was closed.
    while let Some(event) = events.try_recv() {
        if write_event(&mut writer, event).await.is_err() {
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("client shutdown failed: id={}, error={e}", session.id);
    }
    outcome
}

async fn write_event(writer: &mut OwnedWriteHalf, event: Event) -> io::Result<()> {
    match event {
        Event::Data(data) => writer.write_all(&data.payload).await,
        Event::Command(_) => Ok(()),
    }
}
