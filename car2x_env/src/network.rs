//! Network transport abstraction for the vehicle agent.
//!
//! Outbound beacons and inbound notifications travel on two independent
//! channels that share no state:
//!
//! ```text
//! Vehicle                         LAN                          RSU / peers
//!   |-- send_to(x.y.z.255:30001) -->|-- broadcast ------------------>|
//!   |                               |                                |
//!   |<-- recv() on :30002 ----------|<-- DENM / V2V -----------------|
//! ```

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::EnvError;
use crate::types::Datagram;

/// Outbound datagram channel used for CAM beacons.
#[async_trait]
pub trait BeaconTransport: Send + Sync + 'static {
    /// Sends a single datagram to `target`.
    ///
    /// # Returns
    /// * `Ok(())` - Datagram handed to the network stack
    /// * `Err(EnvError)` - Immediate send failure (no network, link down, ...)
    ///
    /// # Note
    /// Success does not guarantee delivery; broadcasts are best-effort.
    async fn send_to(&self, target: SocketAddrV4, payload: &[u8]) -> Result<(), EnvError>;
}

/// Inbound datagram channel bound to the vehicle port.
#[async_trait]
pub trait DatagramSource: Send + Sync + 'static {
    /// Receives the next datagram.
    ///
    /// # Blocking
    /// This method waits until a datagram arrives. Errors are per-datagram
    /// and do not close the source, except `EnvError::ChannelClosed`.
    async fn recv(&self) -> Result<Datagram, EnvError>;
}

/// Network-interface query returning the active local IPv4 address.
pub trait InterfaceQuery: Send + Sync + 'static {
    /// Returns the local IPv4 address, or `None` when no usable interface is up.
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Computes the subnet broadcast address for `local`.
///
/// The last octet is replaced with 255 (`a.b.c.255`). Without a local
/// address the limited broadcast address `255.255.255.255` is used.
pub fn broadcast_address(local: Option<Ipv4Addr>) -> Ipv4Addr {
    match local {
        Some(ip) => {
            let [a, b, c, _] = ip.octets();
            Ipv4Addr::new(a, b, c, 255)
        }
        None => Ipv4Addr::BROADCAST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_address_replaces_last_octet() {
        let local = Ipv4Addr::new(192, 168, 43, 17);
        assert_eq!(broadcast_address(Some(local)), Ipv4Addr::new(192, 168, 43, 255));
    }

    #[test]
    fn test_broadcast_address_without_interface() {
        assert_eq!(broadcast_address(None), Ipv4Addr::new(255, 255, 255, 255));
    }
}
