//! Event sinks receiving the multiplexer's ordered output.
//!
//! The multiplexer emits to two kinds of sink: a single backend sink that
//! receives lifecycle commands and client data, and one client sink per
//! connection that receives data from the backend. Both implement
//! [`EventSink`]. Backpressure belongs to the sink; [`ChannelSink`] makes the
//! policy explicit at construction time.

mod channel;

use async_trait::async_trait;
use thiserror::Error;

pub use channel::{ChannelSink, ChannelSinkBuilder, EventReceiver, SinkConfigError, SinkPolicy};

use crate::event::Event;

/// Errors returned when a sink cannot accept an event.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The sink is at capacity and its policy rejects the event.
    #[error("event sink full")]
    Full,
    /// The sink stayed full for longer than its send timeout.
    #[error("event sink timed out")]
    TimedOut,
    /// The consuming side of the sink has gone away.
    #[error("event sink closed")]
    Closed,
}

/// Consumer of multiplexer events.
///
/// Implementations receive events in the order the multiplexer emits them
/// for any given connection and must not block indefinitely.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the event could not be accepted. A dropping
    /// policy that discards the event still returns `Ok(())`.
    async fn emit(&self, event: Event) -> Result<(), SinkError>;
}
