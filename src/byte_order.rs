//! Network byte-order helpers for the data frame and link headers.
//!
//! Clippy expectations stay scoped to these conversion points so the codecs
//! can remain explicit about wire endianness.

/// Serialise a `u32` length field in network byte order.
///
/// # Examples
///
/// ```
/// use wiremux::byte_order::write_network_u32;
///
/// assert_eq!(write_network_u32(5), [0, 0, 0, 5]);
/// ```
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u32` length field.
///
/// # Examples
///
/// ```
/// use wiremux::byte_order::read_network_u32;
///
/// assert_eq!(read_network_u32([0, 0, 1, 0]), 256);
/// ```
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}

/// Serialise a connection identifier in network byte order.
///
/// # Examples
///
/// ```
/// use wiremux::byte_order::write_network_u64;
///
/// assert_eq!(write_network_u64(1), [0, 0, 0, 0, 0, 0, 0, 1]);
/// ```
#[must_use]
pub fn write_network_u64(value: u64) -> [u8; 8] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order connection identifier.
#[must_use]
pub fn read_network_u64(bytes: [u8; 8]) -> u64 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u64::from_be_bytes(bytes)
}
