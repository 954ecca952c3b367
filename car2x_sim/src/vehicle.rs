//! A fully wired agent running against simulated collaborators.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use car2x_core::{
    AgentConfig, AgentError, AgentLinks, LocationFix, MemorySink, Priority, VehicleAgent,
    VehicleId,
};
use car2x_env::V2xContext;

use crate::context::SimContext;
use crate::network::SimNetwork;
use crate::provider::ScriptedProvider;

/// Local address of the simulated vehicle.
pub const SIM_LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 42);

/// One vehicle plus handles to everything around it.
pub struct SimVehicle {
    pub ctx: Arc<SimContext>,
    pub network: Arc<SimNetwork>,
    pub provider: Arc<ScriptedProvider>,
    pub sink: Arc<MemorySink>,
    pub agent: VehicleAgent<SimContext>,
}

impl SimVehicle {
    /// Builds the vehicle with a listening receive loop. Call inside the
    /// simulation runtime.
    pub fn new(seed: u64, config: AgentConfig) -> Result<Self, AgentError> {
        let ctx = SimContext::shared(seed);
        let network = Arc::new(SimNetwork::new(Some(SIM_LOCAL_IP)));
        let provider = Arc::new(ScriptedProvider::new());
        let sink = Arc::new(MemorySink::new());

        let links = AgentLinks {
            transport: network.clone(),
            interfaces: network.clone(),
            provider: provider.clone(),
            status: sink.clone(),
            warnings: sink.clone(),
        };
        let vehicle_id = VehicleId::from_device_id(&format!("{seed:016x}"));
        let mut agent = VehicleAgent::new(ctx.clone(), config, vehicle_id, links);
        agent.listen(network.clone())?;

        Ok(Self {
            ctx,
            network,
            provider,
            sink,
            agent,
        })
    }

    /// A clean high-accuracy fix at the current virtual time.
    pub fn fix_now(&self, lat: f64, lon: f64, speed_mps: f32) -> LocationFix {
        LocationFix::new(lat, lon, 4.0, speed_mps, self.ctx.epoch_millis())
    }

    /// Pushes `fix` on the high-accuracy stream and lets the pump run.
    pub async fn deliver(&self, fix: LocationFix) -> usize {
        let delivered = self.provider.push(Priority::HighAccuracy, fix);
        settle().await;
        delivered
    }

    /// Advances virtual time, firing every timer that falls due.
    pub async fn advance(&self, duration: Duration) {
        self.ctx.advance(duration).await;
        settle().await;
    }

    /// Sleeps until virtual offset `at` (no-op if already past).
    pub async fn advance_to(&self, at: Duration) {
        let now = self.ctx.now();
        if at > now {
            self.advance(at - now).await;
        }
    }
}

/// Lets every ready task run without moving the clock.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
