//! Backend end of a multiplexer link, driven from tests.

use std::{io, net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_util::codec::Framed;
use wiremux::{
    Command,
    ConnectionId,
    LinkCodec,
    LinkMessage,
    command,
    frame,
};

const LINK_TIMEOUT: Duration = Duration::from_secs(2);

/// Listener the server under test connects to as its backend.
#[derive(Debug)]
pub struct FakeBackend {
    listener: TcpListener,
}

impl FakeBackend {
    /// Bind to an ephemeral loopback port.
    ///
    /// # Errors
    ///
    /// Returns any error raised while binding.
    pub async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    /// Address to hand to the server as its backend.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the listener.
    pub fn addr(&self) -> io::Result<SocketAddr> { self.listener.local_addr() }

    /// Wait for the server's link connection.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::TimedOut`] if no connection arrives in time.
    pub async fn accept(&self) -> io::Result<BackendLink> {
        let (stream, _) = timeout(LINK_TIMEOUT, self.listener.accept())
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
        Ok(BackendLink {
            framed: Framed::new(stream, LinkCodec::default()),
        })
    }
}

/// One accepted backend link.
#[derive(Debug)]
pub struct BackendLink {
    framed: Framed<TcpStream, LinkCodec>,
}

impl BackendLink {
    /// Next message, or `None` on timeout or end of stream.
    ///
    /// # Errors
    ///
    /// Returns decode and socket errors.
    pub async fn next_message(&mut self) -> io::Result<Option<LinkMessage>> {
        match timeout(LINK_TIMEOUT, self.framed.next()).await {
            Ok(Some(message)) => message.map(Some),
            Ok(None) | Err(_) => Ok(None),
        }
    }

    /// Wait for a command message and parse it.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidData`] if the next message is missing
    /// or not a valid command.
    pub async fn expect_command(&mut self) -> io::Result<Command> {
        match self.next_message().await? {
            Some(LinkMessage::Command(line)) => std::str::from_utf8(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
                .and_then(|text| {
                    command::decode(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
                }),
            other => Err(unexpected("command", other.as_ref())),
        }
    }

    /// Wait for a data message and decode its frame.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidData`] if the next message is missing
    /// or not a valid data frame.
    pub async fn expect_data(&mut self) -> io::Result<(ConnectionId, Bytes)> {
        match self.next_message().await? {
            Some(LinkMessage::Data(body)) => {
                frame::decode(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
            other => Err(unexpected("data", other.as_ref())),
        }
    }

    /// Send a data frame for `id`.
    ///
    /// # Errors
    ///
    /// Returns encode and socket errors.
    pub async fn send_data(&mut self, id: ConnectionId, payload: &[u8]) -> io::Result<()> {
        let message = LinkMessage::data(id, payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.framed.send(message).await
    }

    /// Send a command line.
    ///
    /// # Errors
    ///
    /// Returns socket errors.
    pub async fn send_command(&mut self, cmd: Command) -> io::Result<()> {
        self.framed.send(LinkMessage::command(cmd)).await
    }

    /// Send an arbitrary message, valid or not.
    ///
    /// # Errors
    ///
    /// Returns socket errors.
    pub async fn send(&mut self, message: LinkMessage) -> io::Result<()> {
        self.framed.send(message).await
    }
}

fn unexpected(wanted: &str, got: Option<&LinkMessage>) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("expected {wanted} message, got {got:?}"),
    )
}
