//! Test utilities for `wiremux`.
//!
//! [`EventObserver`] records what the multiplexer emits to a sink so tests
//! can assert on per-connection ordering. [`FakeBackend`] stands in for the
//! backend end of a TCP link.
//!
//! ```rust
//! use wiremux::{ConnectionId, Event, EventSink};
//! use wiremux_testing::recording_sink;
//!
//! # async fn example() {
//! let (sink, mut observer) = recording_sink();
//! sink.emit(Event::up(ConnectionId::new(1))).await.unwrap();
//! assert_eq!(observer.next_event().await, Some(Event::up(ConnectionId::new(1))));
//! # }
//! ```

pub mod backend;
pub mod logging;
pub mod observer;

pub use backend::{BackendLink, FakeBackend};
pub use logging::{LoggerHandle, logger};
pub use observer::{EventObserver, assert_lifecycle, recording_sink};
