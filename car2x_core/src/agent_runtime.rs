//! Agent Runtime - wires the filter, beacon and receiver to the environment.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          VehicleAgent                            │
//! │                                                                  │
//! │  LocationProvider ──┬─ current_fix (one-shot) ─┐                 │
//! │                     ├─ high-accuracy stream ───┼─► mpsc ─► pump  │
//! │                     └─ balanced stream ────────┘      (filter)   │
//! │                                                          │       │
//! │                                          SharedPositionState     │
//! │                                             │            │       │
//! │                         beacon tick ◄───────┘            │       │
//! │                  (BeaconTransport, 500 ms)               │       │
//! │                                                          ▼       │
//! │  DatagramSource ──► receive loop ──► InboundDispatcher ──► sinks │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The receive loop runs from `listen` until `shutdown`, independently of
//! broadcasting. A broadcasting session owns the pump, the one-shot request,
//! both subscriptions and the beacon task; stopping cancels all of them.
//!
//! # Usage
//!
//! ```ignore
//! use car2x_core::agent_runtime::{AgentConfig, AgentLinks, VehicleAgent};
//! use car2x_env::TokioContext;
//!
//! let mut agent = VehicleAgent::new(TokioContext::shared(), AgentConfig::default(), id, links);
//! agent.listen(listener)?;
//! agent.start_broadcasting()?;
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use car2x_env::{BeaconTransport, DatagramSource, InterfaceQuery, TaskHandle, V2xContext};

use crate::beacon::BeaconScheduler;
use crate::dispatcher::InboundDispatcher;
use crate::location::{LocationFix, LocationProvider, Priority, Subscription, UpdateRequest};
use crate::location_filter::FilterConfig;
use crate::position_state::{FixPipeline, SharedPositionState};
use crate::ranker::ProximityRanker;
use crate::sinks::{StatusSink, WarningSink};
use crate::vehicle_id::VehicleId;

/// Configuration for a vehicle agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent's logical name (for logging)
    pub name: String,

    /// Broadcast destination port for CAMs (default: 30001)
    pub cam_port: u16,

    /// Inbound DENM/V2V port, advertised in every CAM (default: 30002)
    pub vehicle_port: u16,

    /// Beacon period (default: 500 ms)
    pub beacon_period: Duration,

    /// Peers shown per V2V message (default: 3)
    pub nearest_k: usize,

    /// Capacity of the fix queue feeding the filter (default: 64)
    pub fix_queue_depth: usize,

    pub filter: FilterConfig,
    pub high_accuracy: UpdateRequest,
    pub balanced: UpdateRequest,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "car2x-agent".to_string(),
            cam_port: 30001,
            vehicle_port: 30002,
            beacon_period: Duration::from_millis(500),
            nearest_k: 3,
            fix_queue_depth: 64,
            filter: FilterConfig::default(),
            high_accuracy: UpdateRequest::high_accuracy(),
            balanced: UpdateRequest::balanced(),
        }
    }
}

/// Session-state misuse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Broadcasting is already active")]
    AlreadyBroadcasting,

    #[error("Receive loop is already running")]
    AlreadyListening,
}

/// External collaborators of the agent.
#[derive(Clone)]
pub struct AgentLinks {
    pub transport: Arc<dyn BeaconTransport>,
    pub interfaces: Arc<dyn InterfaceQuery>,
    pub provider: Arc<dyn LocationProvider>,
    pub status: Arc<dyn StatusSink>,
    pub warnings: Arc<dyn WarningSink>,
}

/// Everything that exists only while broadcasting.
struct BroadcastSession {
    beacon: TaskHandle,
    pump: TaskHandle,
    current_fix: TaskHandle,
    subscriptions: Vec<Subscription>,
}

impl BroadcastSession {
    fn cancel(&self) {
        self.beacon.cancel();
        for subscription in &self.subscriptions {
            subscription.cancel();
        }
        self.current_fix.cancel();
        self.pump.cancel();
    }

    async fn shutdown(self) {
        self.cancel();
        self.beacon.shutdown().await;
        self.current_fix.shutdown().await;
        self.pump.shutdown().await;
    }
}

/// A vehicle agent.
///
/// Generic over the context so the same agent runs against tokio in
/// production and the virtual clock in simulation.
pub struct VehicleAgent<C: V2xContext> {
    ctx: Arc<C>,
    config: AgentConfig,
    vehicle_id: VehicleId,
    position: SharedPositionState,
    links: AgentLinks,
    receiver: Option<TaskHandle>,
    session: Option<BroadcastSession>,
}

impl<C: V2xContext> VehicleAgent<C> {
    pub fn new(ctx: Arc<C>, config: AgentConfig, vehicle_id: VehicleId, links: AgentLinks) -> Self {
        Self {
            ctx,
            config,
            vehicle_id,
            position: SharedPositionState::new(),
            links,
            receiver: None,
            session: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn vehicle_id(&self) -> &VehicleId {
        &self.vehicle_id
    }

    /// Handle to the shared position (read side).
    pub fn position(&self) -> SharedPositionState {
        self.position.clone()
    }

    pub fn is_broadcasting(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.receiver.is_some()
    }

    /// Starts the inbound receive loop on `source`.
    pub fn listen(&mut self, source: Arc<dyn DatagramSource>) -> Result<(), AgentError> {
        if self.receiver.is_some() {
            return Err(AgentError::AlreadyListening);
        }

        let dispatcher = InboundDispatcher::new(
            self.position.clone(),
            ProximityRanker::new(self.config.nearest_k),
            self.links.warnings.clone(),
            self.links.status.clone(),
        );
        let ctx = self.ctx.clone();
        let handle = self.ctx.spawn_cancellable("receiver", move |cancel| {
            dispatcher.run(ctx, source, cancel)
        });
        self.receiver = Some(handle);
        Ok(())
    }

    /// Starts location updates and the beacon.
    ///
    /// Every session begins with an empty filter and no position.
    pub fn start_broadcasting(&mut self) -> Result<(), AgentError> {
        if self.session.is_some() {
            return Err(AgentError::AlreadyBroadcasting);
        }

        self.position.clear();
        self.links.status.status("Status: Requesting GPS fix...");

        let (tx, rx) = mpsc::channel(self.config.fix_queue_depth.max(1));
        let pump = self.spawn_pump(rx);
        let current_fix = self.spawn_current_fix(tx.clone());
        let subscriptions = vec![
            self.links
                .provider
                .request_updates(self.config.high_accuracy, tx.clone()),
            self.links.provider.request_updates(self.config.balanced, tx),
        ];

        let beacon = BeaconScheduler::new(
            self.ctx.clone(),
            self.links.transport.clone(),
            self.links.interfaces.clone(),
            self.position.clone(),
            self.links.status.clone(),
            self.vehicle_id.clone(),
            self.config.cam_port,
            self.config.vehicle_port,
            self.config.beacon_period,
        )
        .spawn();

        info!(
            agent = %self.config.name,
            vehicle = %self.vehicle_id,
            cam_port = self.config.cam_port,
            "Broadcasting started"
        );
        self.session = Some(BroadcastSession {
            beacon,
            pump,
            current_fix,
            subscriptions,
        });
        Ok(())
    }

    /// Stops the beacon and all location updates. No-op when idle.
    ///
    /// The receive loop keeps running.
    pub fn stop_broadcasting(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel();
            self.links.status.status("Status: Stopped");
            info!(agent = %self.config.name, "Broadcasting stopped");
        }
    }

    /// Stops everything and waits for all tasks to finish.
    pub async fn shutdown(mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
            self.links.status.status("Status: Stopped");
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.shutdown().await;
        }
        info!(agent = %self.config.name, "Agent shut down");
    }

    /// Single consumer of the fix queue; owns the filter.
    fn spawn_pump(&self, mut rx: mpsc::Receiver<LocationFix>) -> TaskHandle {
        let mut pipeline = FixPipeline::new(
            self.config.filter,
            self.position.clone(),
            self.links.status.clone(),
        );
        let ctx = self.ctx.clone();
        self.ctx.spawn_cancellable("fix-pump", move |mut cancel| async move {
            loop {
                let fix = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    fix = rx.recv() => fix,
                };
                let Some(fix) = fix else { break };
                pipeline.ingest(fix, ctx.epoch_millis());
            }
            debug!("Fix pump stopped");
        })
    }

    fn spawn_current_fix(&self, tx: mpsc::Sender<LocationFix>) -> TaskHandle {
        let provider = self.links.provider.clone();
        self.ctx.spawn_cancellable("current-fix", move |mut cancel| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                fix = provider.current_fix(Priority::HighAccuracy) => {
                    if let Some(fix) = fix {
                        let _ = tx.send(fix).await;
                    }
                }
            }
        })
    }
}
