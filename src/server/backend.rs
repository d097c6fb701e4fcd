//! Task owning the single backend link.
//!
//! Writes every event from the backend sink as a [`LinkMessage`] and feeds
//! every message read from the backend into the multiplexer. A malformed
//! message only drops that message; a broken link ends the task and shuts
//! the server down.

use std::{io, sync::Arc};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

use crate::{
    event::Event,
    link::{LinkCodec, LinkMessage},
    mux::Multiplexer,
    sink::EventReceiver,
};

pub(in crate::server) struct BackendLink {
    pub stream: TcpStream,
    pub mux: Arc<Multiplexer>,
    pub events: EventReceiver,
    pub codec: LinkCodec,
    /// Cancelled by this task when the link ends.
    pub server_shutdown: CancellationToken,
    /// Cancelled by the server once every client has gone DOWN.
    pub link_shutdown: CancellationToken,
}

type LinkReader = FramedRead<OwnedReadHalf, LinkCodec>;
type LinkWriter = FramedWrite<OwnedWriteHalf, LinkCodec>;

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
pub(in crate::server) async fn run_backend_link(link: BackendLink) {
    let BackendLink {
        stream,
        mux,
        mut events,
        codec,
        server_shutdown,
        link_shutdown,
    } = link;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, codec);
    let mut writer = FramedWrite::new(write_half, codec);

    // Inbound delivery can wait on a full client sink; outbound keeps draining
    // the backend sink meanwhile.
    let mut writable = select! {
        biased;

        () = link_shutdown.cancelled() => true,
        () = inbound(&mut reader, &mux) => true,
        writable = outbound(&mut writer, &mut events) => writable,
    };

    // Clients emit their DOWN while shutting down; keep draining until the
    // server reports that every client is gone.
    server_shutdown.cancel();
    loop {
        select! {
            biased;

            () = link_shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => flush_event(&mut writer, &event, &mut writable).await,
                None => break,
            },
        }
    }
    events.close();
    while let Some(event) = events.recv().await {
        flush_event(&mut writer, &event, &mut writable).await;
    }
    if writable && let Err(e) = writer.close().await {
        warn!("backend link close failed: error={e}");
    }
}

async fn inbound(reader: &mut LinkReader, mux: &Multiplexer) {
    while let Some(message) = reader.next().await {
        match message {
            Ok(message) => {
                if let Err(e) = mux.handle_backend_message(message).await {
                    warn!("backend message dropped: error={e}");
                }
            }
            Err(e) => {
                warn!("backend link read failed: error={e}");
                crate::metrics::inc_errors();
                return;
            }
        }
    }
    info!("backend link closed by peer");
}

/// Returns `false` once the link can no longer be written.
async fn outbound(writer: &mut LinkWriter, events: &mut EventReceiver) -> bool {
    while let Some(event) = events.recv().await {
        if let Err(e) = write_event(writer, &event).await {
            warn!("backend link write failed: error={e}");
            return false;
        }
    }
    true
}

async fn flush_event(writer: &mut LinkWriter, event: &Event, writable: &mut bool) {
    if !*writable {
        debug!("backend link down; discarding event: id={}", event.connection_id());
        return;
    }
    if let Err(e) = write_event(writer, event).await {
        warn!("backend link flush failed: error={e}");
        *writable = false;
    }
}

async fn write_event(writer: &mut LinkWriter, event: &Event) -> io::Result<()> {
    match LinkMessage::from_event(event) {
        Ok(message) => writer.send(message).await,
        Err(e) => {
            // Only reachable for payloads the link cannot frame; the client
            // side caps its reads well below that.
            warn!("event not representable on link: id={}, error={e}", event.connection_id());
            crate::metrics::inc_errors();
            Ok(())
        }
    }
}
