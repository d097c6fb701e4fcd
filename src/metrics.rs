//! Metric helpers for `wiremux`.
//!
//! Metric names and thin wrappers over the [`metrics`](https://docs.rs/metrics)
//! facade. Without the `metrics` feature the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking connections in the UP state.
pub const CONNECTIONS_ACTIVE: &str = "wiremux_connections_active";
/// Name of the counter tracking relayed data frames.
pub const FRAMES_TOTAL: &str = "wiremux_frames_total";
/// Name of the counter tracking failed operations.
pub const ERRORS_TOTAL: &str = "wiremux_errors_total";

/// Direction a data frame travelled through the multiplexer.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Client bytes forwarded to the backend.
    ToBackend,
    /// Backend bytes delivered to a client.
    ToClient,
}

impl Direction {
    /// Label value recorded for this direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToBackend => "to_backend",
            Direction::ToClient => "to_client",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a relayed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
