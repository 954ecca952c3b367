//! Car2X Core - vehicle-side cooperative awareness agent.
//!
//! This library turns a noisy stream of position fixes into periodic CAM
//! beacons and turns inbound DENM/V2V datagrams into presentation text:
//! 1. **LocationFilter**: stale, inaccurate and physically implausible fixes are rejected
//! 2. **BeaconScheduler**: one CAM per period, and only from an accepted fix
//! 3. **InboundDispatcher**: untyped datagrams → typed messages → nearest-peer ranking
//!
//! Environment access (clock, sockets, task spawning) goes through
//! `car2x_env`, so the same code runs in production and in simulation.

pub mod agent_runtime;
pub mod beacon;
pub mod dispatcher;
pub mod geo_math;
pub mod location;
pub mod location_filter;
pub mod messages;
pub mod position_state;
pub mod ranker;
pub mod sinks;
pub mod vehicle_id;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use agent_runtime::{AgentConfig, AgentError, AgentLinks, VehicleAgent};
pub use beacon::{BeaconScheduler, TickOutcome};
pub use dispatcher::{format_denm, format_peers, Dispatch, InboundDispatcher, RoutedMessage};
pub use geo_math::{distance_m, GeoPoint};
pub use location::{
    LocationFix, LocationProvider, NoLocation, Priority, Subscription, UpdateRequest, MPS_TO_KMH,
};
pub use location_filter::{FilterConfig, FilterOutcome, LocationFilter, RejectReason};
pub use messages::{
    CamMessage, DecodeError, DenmMessage, InboundMessage, PeerEntry, V2vMessage,
};
pub use position_state::{FixPipeline, SharedPositionState};
pub use ranker::{rank, ProximityRanker, RankedPeer, Ranking};
pub use sinks::{MemorySink, StatusSink, TracingSink, WarningSink};
pub use vehicle_id::VehicleId;
