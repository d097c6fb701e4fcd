#![doc(html_root_url = "https://docs.rs/wiremux/latest")]
//! Public API for the `wiremux` library.
//!
//! This crate multiplexes many client connections onto a single backend
//! link. Each client gets a fresh [`ConnectionId`]; the backend sees an `UP`
//! command, the client's bytes tagged with that identifier, and finally a
//! `DOWN` command. Data frames from the backend are routed back to the
//! matching client.
//!
//! The core lives in [`mux`] and is transport-agnostic: it emits
//! [`Event`]s to [`EventSink`]s. The [`server`] module wires it to TCP.

pub mod byte_order;
pub mod command;
pub mod error;
pub mod event;
pub mod frame;
pub mod link;
pub mod metrics;
pub mod mux;
pub mod registry;
pub mod server;
pub mod sink;

pub use command::{Command, CommandError, Verb};
pub use error::{MuxError, Result};
pub use event::{CommandEvent, DataEvent, Event, Source};
pub use frame::FrameError;
pub use link::{LinkCodec, LinkMessage};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_TOTAL};
pub use mux::{ClientSession, Multiplexer};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionState};
pub use server::{MuxServer, ServerError};
pub use sink::{ChannelSink, EventReceiver, EventSink, SinkError, SinkPolicy};
