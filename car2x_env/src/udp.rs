//! Production UDP channels and interface discovery.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::error::EnvError;
use crate::network::{BeaconTransport, DatagramSource, InterfaceQuery};
use crate::types::{Datagram, MAX_DATAGRAM_BYTES};

/// Outbound broadcast socket for CAM beacons.
///
/// Bound to an ephemeral port with `SO_BROADCAST` enabled.
pub struct UdpBroadcaster {
    socket: UdpSocket,
}

impl UdpBroadcaster {
    /// Binds the outbound socket.
    pub async fn bind() -> Result<Self, EnvError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| EnvError::bind(addr, e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| EnvError::bind(addr, e))?;
        debug!("Outbound broadcast socket ready on {:?}", socket.local_addr().ok());
        Ok(Self { socket })
    }
}

#[async_trait]
impl BeaconTransport for UdpBroadcaster {
    async fn send_to(&self, target: SocketAddrV4, payload: &[u8]) -> Result<(), EnvError> {
        if payload.len() > MAX_DATAGRAM_BYTES {
            return Err(EnvError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_DATAGRAM_BYTES,
            });
        }
        self.socket
            .send_to(payload, target)
            .await
            .map(|_| ())
            .map_err(|e| EnvError::send(target, e))
    }
}

/// Inbound socket bound to the fixed vehicle port.
pub struct UdpListener {
    socket: UdpSocket,
    port: u16,
}

impl UdpListener {
    /// Binds `0.0.0.0:port` for the life of the process.
    pub async fn bind(port: u16) -> Result<Self, EnvError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| EnvError::bind(addr, e))?;
        info!("📡 Listening for DENM/V2V on UDP {addr}");
        Ok(Self { socket, port })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl DatagramSource for UdpListener {
    async fn recv(&self) -> Result<Datagram, EnvError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let (len, source) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(EnvError::Receive)?;
        buf.truncate(len);
        Ok(Datagram::new(source, buf))
    }
}

/// Interface query backed by the host routing table.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel which
/// source address it would route from. The answer is cached for
/// `ADDRESS_TTL` so the beacon tick does not touch a socket every period.
#[derive(Debug, Default)]
pub struct SystemInterfaces {
    override_ip: Option<Ipv4Addr>,
    cached: Mutex<Option<(Instant, Option<Ipv4Addr>)>>,
}

/// Documentation-range route lookup target (RFC 5737), never actually contacted.
const ROUTE_TARGET: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 9);

/// How long a discovered address is reused before asking the kernel again.
const ADDRESS_TTL: Duration = Duration::from_secs(5);

impl SystemInterfaces {
    /// Discovers the address from the routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always reports `ip` instead of querying the host.
    pub fn with_override(ip: Ipv4Addr) -> Self {
        Self {
            override_ip: Some(ip),
            ..Self::default()
        }
    }

    fn cached_or(&self, now: Instant, lookup: impl FnOnce() -> Option<Ipv4Addr>) -> Option<Ipv4Addr> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((at, ip)) = *cached {
            if now.saturating_duration_since(at) < ADDRESS_TTL {
                return ip;
            }
        }
        let ip = lookup();
        trace!(?ip, "local address refreshed");
        *cached = Some((now, ip));
        ip
    }
}

fn route_lookup() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_TARGET).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
        _ => None,
    }
}

impl InterfaceQuery for SystemInterfaces {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        if let Some(ip) = self.override_ip {
            return Some(ip);
        }
        self.cached_or(Instant::now(), route_lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_override_wins() {
        let interfaces = SystemInterfaces::with_override(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(interfaces.local_ipv4(), Some(Ipv4Addr::new(10, 1, 2, 3)));
    }

    #[test]
    fn test_discovered_address_is_cached() {
        let interfaces = SystemInterfaces::new();
        let lookups = Cell::new(0);
        let lookup = || {
            lookups.set(lookups.get() + 1);
            Some(Ipv4Addr::new(192, 168, 4, 20))
        };
        let start = Instant::now();

        assert_eq!(interfaces.cached_or(start, lookup), Some(Ipv4Addr::new(192, 168, 4, 20)));
        for ms in [500, 1000, 4900] {
            let at = start + Duration::from_millis(ms);
            assert_eq!(interfaces.cached_or(at, lookup), Some(Ipv4Addr::new(192, 168, 4, 20)));
        }
        assert_eq!(lookups.get(), 1);

        interfaces.cached_or(start + ADDRESS_TTL, lookup);
        assert_eq!(lookups.get(), 2);
    }

    #[test]
    fn test_missing_address_is_cached_too() {
        let interfaces = SystemInterfaces::new();
        let start = Instant::now();
        assert_eq!(interfaces.cached_or(start, || None), None);
        assert_eq!(
            interfaces.cached_or(start + Duration::from_secs(1), || Some(Ipv4Addr::new(10, 0, 0, 1))),
            None
        );
    }

    #[tokio::test]
    async fn test_loopback_roundtrip() {
        let listener = UdpListener::bind(0).await.unwrap();
        let port = listener.socket.local_addr().unwrap().port();
        let sender = UdpBroadcaster::bind().await.unwrap();

        sender
            .send_to(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), b"{\"type\":\"DENM\"}")
            .await
            .unwrap();

        let datagram = listener.recv().await.unwrap();
        assert_eq!(datagram.payload, b"{\"type\":\"DENM\"}".to_vec());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let sender = UdpBroadcaster::bind().await.unwrap();
        let payload = vec![b'x'; MAX_DATAGRAM_BYTES + 1];
        let err = sender
            .send_to(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::PayloadTooLarge { .. }));
    }
}
