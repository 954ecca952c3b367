//! Inbound dispatcher: datagram bytes → typed message → presentation.
//!
//! The inbound channel is a shared, unauthenticated broadcast medium, so
//! anything that does not decode to a DENM or V2V message is dropped without
//! a trace at the presentation layer.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use car2x_env::{CancelToken, DatagramSource, EnvError, V2xContext};

use crate::messages::{DenmMessage, InboundMessage, PeerEntry};
use crate::position_state::SharedPositionState;
use crate::ranker::{ProximityRanker, RankedPeer};
use crate::sinks::{StatusSink, WarningSink};

/// Pause after a receive error before reading again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Where a decoded datagram was sent.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedMessage {
    Denm(DenmMessage),

    /// V2V list ranked around the current self-position
    NearestPeers {
        total: usize,
        nearest: Vec<RankedPeer>,
    },

    /// V2V list received before any fix was accepted
    AwaitingSelfPosition { total: usize },
}

/// Result of dispatching one datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Routed(RoutedMessage),
    Ignored,
}

/// Routes inbound DENM and V2V messages to the warning sink.
#[derive(Clone)]
pub struct InboundDispatcher {
    position: SharedPositionState,
    ranker: ProximityRanker,
    warnings: Arc<dyn WarningSink>,
    status: Arc<dyn StatusSink>,
}

impl InboundDispatcher {
    pub fn new(
        position: SharedPositionState,
        ranker: ProximityRanker,
        warnings: Arc<dyn WarningSink>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            position,
            ranker,
            warnings,
            status,
        }
    }

    /// Decodes and routes one payload.
    pub fn dispatch(&self, bytes: &[u8]) -> Dispatch {
        let message = match InboundMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                trace!("Dropping undecodable datagram ({} bytes): {e}", bytes.len());
                return Dispatch::Ignored;
            }
        };

        match message {
            InboundMessage::Denm(denm) => {
                debug!(event = %denm.event, severity = %denm.severity, "DENM received");
                self.warnings.warning(&format_denm(&denm));
                Dispatch::Routed(RoutedMessage::Denm(denm))
            }
            InboundMessage::V2v(v2v) => {
                let routed = self.route_peers(v2v.vehicles);
                self.warnings.warning(&format_peers(&routed));
                Dispatch::Routed(routed)
            }
            other => {
                trace!(kind = ?other.type_name(), "Ignoring datagram");
                Dispatch::Ignored
            }
        }
    }

    fn route_peers(&self, peers: Vec<PeerEntry>) -> RoutedMessage {
        let total = peers.len();
        match self.position.snapshot() {
            Some(origin) => RoutedMessage::NearestPeers {
                total,
                nearest: self.ranker.rank(&origin, peers).collect(),
            },
            None => RoutedMessage::AwaitingSelfPosition { total },
        }
    }

    /// Receives and dispatches datagrams until cancelled or the source closes.
    ///
    /// Receive errors are reported and the loop keeps listening.
    pub async fn run<C: V2xContext>(
        self,
        ctx: Arc<C>,
        source: Arc<dyn DatagramSource>,
        mut cancel: CancelToken,
    ) {
        info!("Inbound receive loop started");
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = source.recv() => received,
            };

            match received {
                Ok(datagram) => {
                    self.dispatch(&datagram.payload);
                }
                Err(EnvError::ChannelClosed) => {
                    info!("Inbound channel closed");
                    break;
                }
                Err(e) => {
                    warn!("Receive failed: {e}");
                    self.status.status(&format!("Error receiving: {e}"));
                    ctx.sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }
        info!("Inbound receive loop stopped");
    }
}

/// Hazard summary shown for a DENM.
pub fn format_denm(denm: &DenmMessage) -> String {
    let mut text = format!(
        "⚠ DENM Warning ⚠\nEvent: {}\nCause: {}\nSeverity: {}",
        denm.event, denm.cause, denm.severity
    );
    if let Some(distance) = denm.distance_m {
        let _ = write!(text, "\nDistance: {distance:.2} m");
    }
    if let Some(speed) = denm.speed_kmh {
        let _ = write!(text, "\nSpeed: {speed:.1} km/h");
    }
    text
}

/// Nearby-vehicles summary shown for a V2V list.
pub fn format_peers(routed: &RoutedMessage) -> String {
    match routed {
        RoutedMessage::NearestPeers { total, nearest } => {
            let mut text = format!("🚗 V2V Nearby Vehicles\nTotal: {total}");
            for ranked in nearest {
                let _ = write!(
                    text,
                    "\n{} | {:.1} m | {:.1} km/h",
                    ranked.peer.vehicle_id, ranked.distance_m, ranked.peer.speed_kmh
                );
            }
            text
        }
        RoutedMessage::AwaitingSelfPosition { total } => format!(
            "🚗 V2V Nearby Vehicles\nTotal: {total}\n(Waiting for GPS to compute nearest...)"
        ),
        RoutedMessage::Denm(denm) => format_denm(denm),
    }
}
