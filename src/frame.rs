//! Data frames tagged with a connection identifier.
//!
//! A frame is a fixed 12-byte header followed by the payload:
//!
//! ```text
//! +----------------------+--------------------+-----------------+
//! | connection id (u64)  | payload len (u32)  | payload bytes   |
//! +----------------------+--------------------+-----------------+
//! ```
//!
//! Both header fields are big-endian. [`decode`] is the exact inverse of
//! [`encode`]: it rejects truncated input, trailing bytes and the reserved
//! identifier zero.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{
    byte_order::{read_network_u32, read_network_u64, write_network_u32, write_network_u64},
    registry::ConnectionId,
};

/// Size of the connection identifier field.
pub const ID_LEN: usize = 8;
/// Size of the payload length field.
pub const LENGTH_LEN: usize = 4;
/// Total header size preceding every payload.
pub const FRAME_HEADER_LEN: usize = ID_LEN + LENGTH_LEN;

/// Errors raised while encoding or decoding frames and link messages.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the header or declared payload requires.
    #[error("truncated frame: have {have} bytes, need {need}")]
    Truncated {
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },
    /// More bytes follow the declared payload.
    #[error("frame length mismatch: declared {declared}, found {actual}")]
    LengthMismatch {
        /// Payload length carried in the header.
        declared: usize,
        /// Payload bytes actually present.
        actual: usize,
    },
    /// The header names the reserved identifier zero.
    #[error("connection id 0 is reserved")]
    ReservedConnectionId,
    /// The payload cannot be described by the length field, or exceeds the
    /// configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    Oversized {
        /// Size of the offending payload.
        size: usize,
        /// Largest accepted size.
        max: usize,
    },
    /// A link message carried an unknown kind byte.
    #[error("unknown link message kind {0:#04x}")]
    UnknownKind(u8),
    /// A command message was not valid UTF-8.
    #[error("command message is not valid UTF-8")]
    InvalidUtf8,
}

/// Largest payload a single frame can describe.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Append the encoded frame for `payload` to `dst`.
///
/// # Errors
///
/// Returns [`FrameError::Oversized`] if `payload` is longer than
/// [`MAX_PAYLOAD_LEN`].
pub fn encode_into(id: ConnectionId, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::Oversized {
        size: payload.len(),
        max: MAX_PAYLOAD_LEN,
    })?;
    dst.reserve(FRAME_HEADER_LEN + payload.len());
    dst.put_slice(&write_network_u64(id.as_u64()));
    dst.put_slice(&write_network_u32(len));
    dst.put_slice(payload);
    Ok(())
}

/// Tag `payload` with its connection identifier.
///
/// # Errors
///
/// Returns [`FrameError::Oversized`] if `payload` is longer than
/// [`MAX_PAYLOAD_LEN`].
///
/// # Examples
///
/// ```
/// use wiremux::{ConnectionId, frame};
///
/// let wire = frame::encode(ConnectionId::new(1), b"hello").expect("encode");
/// let (id, payload) = frame::decode(wire).expect("decode");
/// assert_eq!(id, ConnectionId::new(1));
/// assert_eq!(&payload[..], b"hello");
/// ```
pub fn encode(id: ConnectionId, payload: &[u8]) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    encode_into(id, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Split a frame into its connection identifier and payload.
///
/// The payload shares the input buffer.
///
/// # Errors
///
/// Returns a [`FrameError`] if the header is incomplete, the identifier is
/// zero, or the declared length disagrees with the bytes present.
pub fn decode(frame: Bytes) -> Result<(ConnectionId, Bytes), FrameError> {
    let header = frame
        .get(..FRAME_HEADER_LEN)
        .ok_or(FrameError::Truncated {
            have: frame.len(),
            need: FRAME_HEADER_LEN,
        })?;
    let (id_bytes, len_bytes) = header.split_at(ID_LEN);
    let id = read_network_u64(id_bytes.try_into().map_err(|_| truncated(&frame))?);
    let declared = read_network_u32(len_bytes.try_into().map_err(|_| truncated(&frame))?) as usize;

    if id == 0 {
        return Err(FrameError::ReservedConnectionId);
    }
    let actual = frame.len() - FRAME_HEADER_LEN;
    if actual < declared {
        return Err(FrameError::Truncated {
            have: frame.len(),
            need: FRAME_HEADER_LEN + declared,
        });
    }
    if actual > declared {
        return Err(FrameError::LengthMismatch { declared, actual });
    }
    Ok((ConnectionId::new(id), frame.slice(FRAME_HEADER_LEN..)))
}

fn truncated(frame: &Bytes) -> FrameError {
    FrameError::Truncated {
        have: frame.len(),
        need: FRAME_HEADER_LEN,
    }
}
