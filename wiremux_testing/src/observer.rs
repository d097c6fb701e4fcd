//! Recording sink for asserting on emitted events.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use wiremux::{
    ChannelSink,
    ConnectionId,
    Event,
    EventReceiver,
    EventSink,
    SinkPolicy,
    Source,
    Verb,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Build a generous, blocking sink paired with an [`EventObserver`].
///
/// # Panics
///
/// Never in practice; the capacity used is always valid.
#[must_use]
pub fn recording_sink() -> (Arc<dyn EventSink>, EventObserver) {
    let (sink, events) = ChannelSink::builder()
        .capacity(1024)
        .policy(SinkPolicy::Block)
        .build()
        .expect("non-zero capacity");
    (Arc::new(sink), EventObserver { events })
}

/// Receiving side of [`recording_sink`].
#[derive(Debug)]
pub struct EventObserver {
    events: EventReceiver,
}

impl EventObserver {
    /// Wait up to two seconds for the next event.
    pub async fn next_event(&mut self) -> Option<Event> {
        timeout(RECV_TIMEOUT, self.events.recv()).await.ok().flatten()
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Event> { std::iter::from_fn(|| self.events.try_recv()).collect() }

    /// Events that belong to `id`, in emission order.
    pub fn drain_for(&mut self, id: ConnectionId) -> Vec<Event> {
        self.drain()
            .into_iter()
            .filter(|event| event.connection_id() == id)
            .collect()
    }
}

/// Assert that `events` form one well-ordered lifecycle for a connection.
///
/// The first event must be UP, data may follow, and a DOWN, if present, must
/// be last. Returns the data payloads in order.
///
/// # Panics
///
/// Panics with a description of the first violation.
pub fn assert_lifecycle(events: &[Event]) -> Vec<Vec<u8>> {
    let Some((first, rest)) = events.split_first() else {
        panic!("no events recorded");
    };
    assert_eq!(first.verb(), Some(Verb::Up), "first event must be UP: {events:?}");
    let id = first.connection_id();
    let mut payloads = Vec::new();
    for (pos, event) in rest.iter().enumerate() {
        assert_eq!(event.connection_id(), id, "mixed identifiers: {events:?}");
        match event {
            Event::Data(data) => {
                assert_eq!(data.source, Source::FromClient, "unexpected source: {events:?}");
                payloads.push(data.payload.to_vec());
            }
            Event::Command(cmd) => {
                assert_eq!(cmd.verb, Verb::Down, "second UP: {events:?}");
                assert_eq!(pos + 1, rest.len(), "event after DOWN: {events:?}");
            }
        }
    }
    payloads
}
