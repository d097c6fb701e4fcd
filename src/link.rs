//! Streaming codec for the single backend link.
//!
//! The backend byte stream carries two kinds of message, never mixed inside a
//! single message:
//!
//! ```text
//! command: 0x01 | u32 BE length | UTF-8 command line
//! data:    0x02 | u32 BE length | data frame (see `frame`)
//! ```
//!
//! [`LinkCodec`] only validates the envelope. Command and frame bodies are
//! parsed by the multiplexer so that one malformed message is dropped without
//! ending the link. An unknown kind byte or an oversized length cannot be
//! resynchronised, so those end the stream with `InvalidData`.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    byte_order::{read_network_u32, write_network_u32},
    command::Command,
    event::Event,
    frame::{self, FRAME_HEADER_LEN, FrameError},
    registry::ConnectionId,
};

/// Kind byte for command messages.
pub const COMMAND_KIND: u8 = 0x01;
/// Kind byte for data messages.
pub const DATA_KIND: u8 = 0x02;
/// Kind byte plus length prefix.
pub const LINK_HEADER_LEN: usize = 5;

/// Minimum message body length accepted by [`LinkCodec::new`].
pub const MIN_MESSAGE_LENGTH: usize = 64;
/// Maximum message body length accepted by [`LinkCodec::new`] (16 MiB).
pub const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;
/// Default body limit: a 64 KiB payload plus its frame header.
pub const DEFAULT_MESSAGE_LENGTH: usize = 64 * 1024 + FRAME_HEADER_LEN;

/// One message on the backend link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkMessage {
    /// A command line such as `"3 DOWN"`.
    Command(Bytes),
    /// An encoded data frame.
    Data(Bytes),
}

impl LinkMessage {
    /// Wrap a lifecycle command.
    #[must_use]
    pub fn command(cmd: Command) -> Self { Self::Command(Bytes::from(cmd.to_string())) }

    /// Encode `payload` as a data frame for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Oversized`] if the payload cannot be framed.
    pub fn data(id: ConnectionId, payload: &[u8]) -> Result<Self, FrameError> {
        frame::encode(id, payload).map(Self::Data)
    }

    /// Translate a backend-bound event into a link message.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Oversized`] if a data payload cannot be framed.
    pub fn from_event(event: &Event) -> Result<Self, FrameError> {
        match event {
            Event::Command(cmd) => Ok(Self::command(*cmd)),
            Event::Data(data) => Self::data(data.id, &data.payload),
        }
    }

    /// Kind byte written ahead of the body.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Self::Command(_) => COMMAND_KIND,
            Self::Data(_) => DATA_KIND,
        }
    }

    /// Message body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        match self {
            Self::Command(body) | Self::Data(body) => body,
        }
    }
}

/// `tokio_util` codec for [`LinkMessage`]s.
#[derive(Clone, Copy, Debug)]
pub struct LinkCodec {
    max_message_length: usize,
}

impl LinkCodec {
    /// Construct a codec, clamping the body limit to
    /// [`MIN_MESSAGE_LENGTH`]..=[`MAX_MESSAGE_LENGTH`].
    #[must_use]
    pub fn new(max_message_length: usize) -> Self {
        Self {
            max_message_length: max_message_length.clamp(MIN_MESSAGE_LENGTH, MAX_MESSAGE_LENGTH),
        }
    }

    /// Largest body this codec reads or writes.
    #[must_use]
    pub fn max_message_length(&self) -> usize { self.max_message_length }

    fn check_length(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_message_length {
            return Err(FrameError::Oversized {
                size,
                max: self.max_message_length,
            });
        }
        Ok(())
    }
}

impl Default for LinkCodec {
    fn default() -> Self { Self::new(DEFAULT_MESSAGE_LENGTH) }
}

fn invalid_data(err: FrameError) -> io::Error { io::Error::new(io::ErrorKind::InvalidData, err) }

impl Decoder for LinkCodec {
    type Item = LinkMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = src.get(..LINK_HEADER_LEN) else {
            return Ok(None);
        };
        let (kind, len_bytes) = header.split_at(1);
        let kind = kind.first().copied().unwrap_or_default();
        if kind != COMMAND_KIND && kind != DATA_KIND {
            return Err(invalid_data(FrameError::UnknownKind(kind)));
        }
        let len_bytes: [u8; 4] = len_bytes
            .try_into()
            .map_err(|_| invalid_data(FrameError::Truncated {
                have: src.len(),
                need: LINK_HEADER_LEN,
            }))?;
        let len = read_network_u32(len_bytes) as usize;
        self.check_length(len).map_err(invalid_data)?;

        let total = LINK_HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let mut message = src.split_to(total);
        message.advance(LINK_HEADER_LEN);
        let body = message.freeze();
        Ok(Some(if kind == COMMAND_KIND {
            LinkMessage::Command(body)
        } else {
            LinkMessage::Data(body)
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None => {
                tracing::debug!(buffered = src.len(), "backend link closed mid-message");
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("backend link closed mid-message: {} bytes buffered", src.len()),
                ))
            }
        }
    }
}

impl Encoder<LinkMessage> for LinkCodec {
    type Error = io::Error;

    fn encode(&mut self, item: LinkMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.body();
        self.check_length(body.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let len = u32::try_from(body.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "link message too large")
        })?;
        dst.reserve(LINK_HEADER_LEN + body.len());
        dst.put_u8(item.kind());
        dst.put_slice(&write_network_u32(len));
        dst.put_slice(body);
        Ok(())
    }
}
