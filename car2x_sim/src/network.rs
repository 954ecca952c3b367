//! Simulated network with fault injection.
//!
//! One object plays all three network collaborators: it records outbound
//! beacons, feeds injected datagrams to the receive loop and answers the
//! interface query.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use car2x_core::{CamMessage, InboundMessage};
use car2x_env::{
    BeaconTransport, Datagram, DatagramSource, EnvError, InterfaceQuery, MAX_DATAGRAM_BYTES,
};

/// A datagram the agent handed to the outbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub target: SocketAddrV4,
    pub payload: Vec<u8>,
}

impl SentDatagram {
    /// Decodes the payload as a CAM.
    pub fn cam(&self) -> Option<CamMessage> {
        match InboundMessage::decode(&self.payload) {
            Ok(InboundMessage::Cam(cam)) => Some(cam),
            _ => None,
        }
    }
}

/// In-memory network for one simulated vehicle.
pub struct SimNetwork {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Datagram>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    sent: Mutex<Vec<SentDatagram>>,
    link_up: AtomicBool,
    local_ip: Mutex<Option<Ipv4Addr>>,
    send_failures: AtomicU64,
}

/// Default injection source (a roadside unit on the simulated LAN).
const RSU_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 40000);

impl SimNetwork {
    pub fn new(local_ip: Option<Ipv4Addr>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            link_up: AtomicBool::new(true),
            local_ip: Mutex::new(local_ip),
            send_failures: AtomicU64::new(0),
        }
    }

    /// Delivers `payload` to the receive loop as if sent by the RSU.
    pub fn inject(&self, payload: impl Into<Vec<u8>>) {
        self.inject_from(SocketAddr::V4(RSU_ADDR), payload);
    }

    pub fn inject_from(&self, source: SocketAddr, payload: impl Into<Vec<u8>>) {
        let mut payload = payload.into();
        payload.truncate(MAX_DATAGRAM_BYTES);
        if let Some(tx) = lock(&self.inbound_tx).as_ref() {
            let _ = tx.send(Datagram::new(source, payload));
        }
    }

    /// Closes the inbound channel; the receive loop ends after draining it.
    pub fn close_inbound(&self) {
        lock(&self.inbound_tx).take();
    }

    /// Brings the outbound link up or down.
    pub fn set_link(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }

    pub fn set_local_ip(&self, ip: Option<Ipv4Addr>) {
        *lock(&self.local_ip) = ip;
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        lock(&self.sent).clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Every recorded datagram that decodes as a CAM.
    pub fn sent_cams(&self) -> Vec<CamMessage> {
        lock(&self.sent).iter().filter_map(SentDatagram::cam).collect()
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl BeaconTransport for SimNetwork {
    async fn send_to(&self, target: SocketAddrV4, payload: &[u8]) -> Result<(), EnvError> {
        if !self.link_up.load(Ordering::SeqCst) {
            self.send_failures.fetch_add(1, Ordering::SeqCst);
            return Err(EnvError::LinkDown);
        }
        if payload.len() > MAX_DATAGRAM_BYTES {
            self.send_failures.fetch_add(1, Ordering::SeqCst);
            return Err(EnvError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_DATAGRAM_BYTES,
            });
        }
        lock(&self.sent).push(SentDatagram {
            target,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl DatagramSource for SimNetwork {
    async fn recv(&self) -> Result<Datagram, EnvError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.ok_or(EnvError::ChannelClosed)
    }
}

impl InterfaceQuery for SimNetwork {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        *lock(&self.local_ip)
    }
}
