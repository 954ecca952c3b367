//! Fixed-period CAM beacon scheduler.
//!
//! Each tick reads the shared position. No fix means no traffic: the tick
//! only reports that it is waiting. With a fix, one CAM is built and handed
//! to the transport for a single best-effort broadcast. A failed send is
//! reported and the next tick proceeds as usual.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use car2x_env::{broadcast_address, BeaconTransport, EnvError, InterfaceQuery, TaskHandle, V2xContext};

use crate::messages::CamMessage;
use crate::position_state::SharedPositionState;
use crate::sinks::StatusSink;
use crate::vehicle_id::VehicleId;

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    Sent {
        target: SocketAddrV4,
        message: CamMessage,
    },
    WaitingForFix,
    SendFailed(EnvError),
    EncodeFailed(serde_json::Error),
}

/// Builds and broadcasts one CAM per period.
pub struct BeaconScheduler<C: V2xContext> {
    ctx: Arc<C>,
    transport: Arc<dyn BeaconTransport>,
    interfaces: Arc<dyn InterfaceQuery>,
    position: SharedPositionState,
    status: Arc<dyn StatusSink>,
    vehicle_id: VehicleId,

    /// Destination port of the broadcast
    cam_port: u16,

    /// Port advertised in the CAM for replies
    vehicle_port: u16,
    period: Duration,
}

impl<C: V2xContext> BeaconScheduler<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<C>,
        transport: Arc<dyn BeaconTransport>,
        interfaces: Arc<dyn InterfaceQuery>,
        position: SharedPositionState,
        status: Arc<dyn StatusSink>,
        vehicle_id: VehicleId,
        cam_port: u16,
        vehicle_port: u16,
        period: Duration,
    ) -> Self {
        Self {
            ctx,
            transport,
            interfaces,
            position,
            status,
            vehicle_id,
            cam_port,
            vehicle_port,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs one beacon tick.
    pub async fn tick(&self) -> TickOutcome {
        let Some(fix) = self.position.snapshot() else {
            self.status.status("Status: Waiting for stable GPS...");
            return TickOutcome::WaitingForFix;
        };

        let local = self.interfaces.local_ipv4();
        let target = SocketAddrV4::new(broadcast_address(local), self.cam_port);
        let message = CamMessage::from_fix(
            &self.vehicle_id,
            &fix,
            self.ctx.epoch_millis(),
            local.unwrap_or(Ipv4Addr::UNSPECIFIED),
            self.vehicle_port,
        );

        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("CAM encoding failed: {e}");
                self.status.status(&format!("Error sending CAM: {e}"));
                return TickOutcome::EncodeFailed(e);
            }
        };

        match self.transport.send_to(target, &payload).await {
            Ok(()) => {
                debug!(%target, bytes = payload.len(), "CAM sent");
                self.status.status("Status: Broadcasting CAM beacons...");
                self.status.last_beacon(&format!(
                    "Last CAM:\n{} | Lat={}, Lon={}, Speed={:.1} km/h",
                    self.vehicle_id, message.lat, message.lon, message.speed_kmh
                ));
                TickOutcome::Sent { target, message }
            }
            Err(e) => {
                warn!(%target, "CAM send failed: {e}");
                self.status.status(&format!("Error sending CAM: {e}"));
                TickOutcome::SendFailed(e)
            }
        }
    }

    /// Starts ticking immediately and then once per period until the
    /// returned handle is cancelled.
    pub fn spawn(self) -> TaskHandle {
        let ctx = self.ctx.clone();
        ctx.spawn_cancellable("beacon", move |mut cancel| async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                self.tick().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = self.ctx.sleep(self.period) => {}
                }
            }
            debug!("Beacon loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationFix;
    use crate::location_filter::FilterConfig;
    use crate::messages::InboundMessage;
    use crate::position_state::FixPipeline;
    use crate::sinks::MemorySink;
    use crate::test_support::{FixedInterfaces, RecordingTransport};
    use car2x_env::TokioContext;

    struct Harness {
        ctx: Arc<TokioContext>,
        transport: Arc<RecordingTransport>,
        position: SharedPositionState,
        sink: Arc<MemorySink>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ctx: TokioContext::shared(),
                transport: Arc::new(RecordingTransport::default()),
                position: SharedPositionState::new(),
                sink: Arc::new(MemorySink::new()),
            }
        }

        fn scheduler(&self, local: Option<Ipv4Addr>) -> BeaconScheduler<TokioContext> {
            BeaconScheduler::new(
                self.ctx.clone(),
                self.transport.clone(),
                Arc::new(FixedInterfaces(local)),
                self.position.clone(),
                self.sink.clone(),
                VehicleId::from_device_id("feedbeef"),
                30001,
                30002,
                Duration::from_millis(500),
            )
        }

        fn accept_fix(&self, speed: f32) {
            let now = self.ctx.epoch_millis();
            let mut pipeline = FixPipeline::new(
                FilterConfig::default(),
                self.position.clone(),
                Arc::new(MemorySink::new()),
            );
            assert!(pipeline
                .ingest(LocationFix::new(48.1, 11.5, 4.0, speed, now), now)
                .is_accepted());
        }
    }

    #[tokio::test]
    async fn test_no_fix_means_no_traffic() {
        let h = Harness::new();
        let outcome = h.scheduler(Some(Ipv4Addr::new(10, 0, 0, 5))).tick().await;

        assert!(matches!(outcome, TickOutcome::WaitingForFix));
        assert!(h.transport.sent().is_empty());
        assert_eq!(
            h.sink.last_status().as_deref(),
            Some("Status: Waiting for stable GPS...")
        );
    }

    #[tokio::test]
    async fn test_cam_sent_to_subnet_broadcast() {
        let h = Harness::new();
        h.accept_fix(10.0);

        let outcome = h.scheduler(Some(Ipv4Addr::new(192, 168, 43, 17))).tick().await;
        let TickOutcome::Sent { target, message } = outcome else {
            panic!("expected a sent CAM");
        };

        assert_eq!(target, SocketAddrV4::new(Ipv4Addr::new(192, 168, 43, 255), 30001));
        assert_eq!(message.vehicle_id, "CARBEEF");
        assert_eq!(message.ip, "192.168.43.17");
        assert_eq!(message.denm_port, 30002);
        assert!((message.speed_kmh - 36.0).abs() < 1e-6);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            InboundMessage::decode(&sent[0].1).unwrap(),
            InboundMessage::Cam(message)
        );
        assert_eq!(
            h.sink.beacons(),
            vec!["Last CAM:\nCARBEEF | Lat=48.1, Lon=11.5, Speed=36.0 km/h".to_string()]
        );
    }

    #[tokio::test]
    async fn test_no_interface_falls_back_to_limited_broadcast() {
        let h = Harness::new();
        h.accept_fix(0.0);

        let TickOutcome::Sent { target, message } = h.scheduler(None).tick().await else {
            panic!("expected a sent CAM");
        };
        assert_eq!(target, SocketAddrV4::new(Ipv4Addr::BROADCAST, 30001));
        assert_eq!(message.ip, "0.0.0.0");
    }

    #[tokio::test]
    async fn test_send_failure_reported() {
        let h = Harness::new();
        h.accept_fix(0.0);
        h.transport.set_down(true);

        let outcome = h.scheduler(None).tick().await;
        assert!(matches!(outcome, TickOutcome::SendFailed(EnvError::LinkDown)));
        assert_eq!(
            h.sink.last_status().as_deref(),
            Some("Error sending CAM: Network link down")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_ticks_every_period() {
        let h = Harness::new();
        h.accept_fix(0.0);

        let handle = h.scheduler(None).spawn();
        // Ticks at 0, 500, 1000, 1500, 2000 ms
        tokio::time::sleep(Duration::from_millis(2250)).await;
        handle.shutdown().await;

        assert_eq!(h.transport.sent().len(), 5);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(h.transport.sent().len(), 5);
    }
}
