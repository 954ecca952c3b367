//! In-crate fakes for the collaborator traits.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use car2x_env::{cancel_pair, BeaconTransport, CancelToken, EnvError, InterfaceQuery};

use crate::location::{LocationFix, LocationProvider, Priority, Subscription, UpdateRequest};

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(SocketAddrV4, Vec<u8>)>>,
    pub down: AtomicBool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl BeaconTransport for RecordingTransport {
    async fn send_to(&self, target: SocketAddrV4, payload: &[u8]) -> Result<(), EnvError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(EnvError::LinkDown);
        }
        self.sent.lock().unwrap().push((target, payload.to_vec()));
        Ok(())
    }
}

pub struct FixedInterfaces(pub Option<Ipv4Addr>);

impl InterfaceQuery for FixedInterfaces {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self.0
    }
}

/// Provider whose fixes are pushed by the test.
#[derive(Default)]
pub struct ManualProvider {
    pub current: Mutex<Option<LocationFix>>,
    pub subscribers: Mutex<Vec<(UpdateRequest, mpsc::Sender<LocationFix>, CancelToken)>>,
}

impl ManualProvider {
    pub fn push(&self, fix: LocationFix) {
        for (_, tx, token) in self.subscribers.lock().unwrap().iter() {
            if !token.is_cancelled() {
                let _ = tx.try_send(fix);
            }
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, token)| !token.is_cancelled())
            .count()
    }
}

#[async_trait]
impl LocationProvider for ManualProvider {
    async fn current_fix(&self, _priority: Priority) -> Option<LocationFix> {
        *self.current.lock().unwrap()
    }

    fn request_updates(
        &self,
        request: UpdateRequest,
        updates: mpsc::Sender<LocationFix>,
    ) -> Subscription {
        let (cancel, token) = cancel_pair();
        self.subscribers.lock().unwrap().push((request, updates, token));
        Subscription::new(cancel)
    }
}
