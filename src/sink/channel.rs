//! Bounded channel sink with a construction-time backpressure policy.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, warn};

use super::{EventSink, SinkError};
use crate::event::Event;

const DEFAULT_CAPACITY: usize = 64;
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Behaviour when the channel is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkPolicy {
    /// Wait for capacity, up to the configured send timeout.
    Block,
    /// Return [`SinkError::Full`] to the emitter.
    ReturnErrorIfFull,
    /// Silently discard the event.
    DropIfFull,
    /// Discard the event and emit a log warning.
    WarnAndDropIfFull,
}

/// Errors returned when building a [`ChannelSink`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkConfigError {
    /// The capacity was zero.
    #[error("invalid sink capacity {0}; must be >= 1")]
    InvalidCapacity(usize),
}

/// Builder for [`ChannelSink`].
///
/// Defaults to a capacity of 64 events, [`SinkPolicy::Block`] and a 30 second
/// send timeout.
///
/// # Examples
///
/// ```
/// use wiremux::sink::{ChannelSink, SinkPolicy};
///
/// let (sink, _events) = ChannelSink::builder()
///     .capacity(8)
///     .policy(SinkPolicy::ReturnErrorIfFull)
///     .build()
///     .expect("failed to build sink");
/// assert_eq!(sink.policy(), SinkPolicy::ReturnErrorIfFull);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct ChannelSinkBuilder {
    capacity: usize,
    policy: SinkPolicy,
    send_timeout: Option<Duration>,
}

impl Default for ChannelSinkBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: SinkPolicy::Block,
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
        }
    }
}

impl ChannelSinkBuilder {
    /// Set the number of events buffered before the policy applies.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the full-channel policy.
    #[must_use]
    pub fn policy(mut self, policy: SinkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound how long [`SinkPolicy::Block`] waits for capacity.
    ///
    /// `None` waits until the receiver drains or closes.
    #[must_use]
    pub fn send_timeout(mut self, send_timeout: Option<Duration>) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Build the sink and its paired receiver.
    ///
    /// # Errors
    ///
    /// Returns [`SinkConfigError::InvalidCapacity`] if the capacity is zero.
    pub fn build(self) -> Result<(ChannelSink, EventReceiver), SinkConfigError> {
        if self.capacity == 0 {
            return Err(SinkConfigError::InvalidCapacity(self.capacity));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        Ok((
            ChannelSink {
                tx,
                policy: self.policy,
                send_timeout: self.send_timeout,
                dropped: Arc::new(AtomicUsize::new(0)),
            },
            EventReceiver { rx },
        ))
    }
}

/// [`EventSink`] backed by a bounded `tokio` channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
    policy: SinkPolicy,
    send_timeout: Option<Duration>,
    dropped: Arc<AtomicUsize>,
}

impl ChannelSink {
    /// Start building a channel sink.
    #[must_use]
    pub fn builder() -> ChannelSinkBuilder { ChannelSinkBuilder::default() }

    /// Policy applied when the channel is full.
    #[must_use]
    pub fn policy(&self) -> SinkPolicy { self.policy }

    /// Number of events discarded by a dropping policy so far.
    #[must_use]
    pub fn dropped(&self) -> usize { self.dropped.load(Ordering::Relaxed) }

    /// Returns true once the receiver has been dropped or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }

    async fn send_blocking(&self, event: Event) -> Result<(), SinkError> {
        let send = self.tx.send(event);
        match self.send_timeout {
            Some(limit) => match timeout(limit, send).await {
                Ok(result) => result.map_err(|_| SinkError::Closed),
                Err(_) => Err(SinkError::TimedOut),
            },
            None => send.await.map_err(|_| SinkError::Closed),
        }
    }

    fn record_drop(&self, event: &Event) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if self.policy == SinkPolicy::WarnAndDropIfFull {
            warn!(
                id = %event.connection_id(),
                dropped,
                "event sink full; dropping event"
            );
        }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: Event) -> Result<(), SinkError> {
        if self.policy == SinkPolicy::Block {
            return self.send_blocking(event).await;
        }
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => match self.policy {
                SinkPolicy::ReturnErrorIfFull => {
                    debug!(id = %event.connection_id(), "event sink full");
                    Err(SinkError::Full)
                }
                _ => {
                    self.record_drop(&event);
                    Ok(())
                }
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

/// Receiving half of a [`ChannelSink`].
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` once every sender is gone and the buffer is empty.
    pub async fn recv(&mut self) -> Option<Event> { self.rx.recv().await }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> { self.rx.try_recv().ok() }

    /// Stop accepting events; buffered events can still be received.
    pub fn close(&mut self) { self.rx.close(); }
}
