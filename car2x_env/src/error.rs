//! Error types for the Car2X environment abstraction.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
///
/// None of these are fatal to the agent: the owning loop reports them and
/// keeps running.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Socket could not be bound (port in use, permission denied, ...)
    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Datagram send failed (no network, unreachable, ...)
    #[error("Send to {target} failed: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Datagram receive failed
    #[error("Receive failed: {0}")]
    Receive(#[source] std::io::Error),

    /// Payload does not fit into a single datagram
    #[error("Payload of {size} bytes exceeds datagram limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Network link is down (simulated outage)
    #[error("Network link down")]
    LinkDown,

    /// The datagram channel was closed (shutdown)
    #[error("Channel closed")]
    ChannelClosed,
}

impl EnvError {
    /// Creates a bind error.
    pub fn bind(addr: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }

    /// Creates a send error.
    pub fn send(target: impl Into<SocketAddr>, source: std::io::Error) -> Self {
        Self::Send {
            target: target.into(),
            source,
        }
    }
}
