//! Common types for the Car2X environment abstraction.

use std::net::SocketAddr;

/// Largest payload accepted on either channel.
///
/// Messages are single UDP datagrams; nothing is fragmented or reassembled.
pub const MAX_DATAGRAM_BYTES: usize = 4096;

/// A received datagram.
///
/// The payload is opaque bytes; parsing happens in the inbound dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender address
    pub source: SocketAddr,

    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Datagram {
    /// Creates a datagram from payload bytes.
    pub fn new(source: SocketAddr, payload: Vec<u8>) -> Self {
        Self { source, payload }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
