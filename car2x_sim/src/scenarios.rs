//! Deterministic scenarios for the vehicle agent.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Two fixes 11 m apart, 0.5 s apart: the second is a jump
    JumpRejection,

    /// Same two fixes, 2 s apart: the second is plausible
    SlowDrift,

    /// DENM through the receive loop to the warning sink
    DenmDisplay,

    /// Foreign and malformed traffic on the vehicle port
    GarbageIgnored,

    /// Seeded drive with injected fix faults
    NoisyDrive,

    /// Outbound link down for a few ticks
    LinkOutage,

    /// V2V list ranked around the vehicle
    NearestPeers,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::JumpRejection,
            ScenarioId::SlowDrift,
            ScenarioId::DenmDisplay,
            ScenarioId::GarbageIgnored,
            ScenarioId::NoisyDrive,
            ScenarioId::LinkOutage,
            ScenarioId::NearestPeers,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::JumpRejection => "jump_rejection",
            ScenarioId::SlowDrift => "slow_drift",
            ScenarioId::DenmDisplay => "denm_display",
            ScenarioId::GarbageIgnored => "garbage_ignored",
            ScenarioId::NoisyDrive => "noisy_drive",
            ScenarioId::LinkOutage => "link_outage",
            ScenarioId::NearestPeers => "nearest_peers",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::JumpRejection => "11 m in 0.5 s implies 22 m/s: second fix rejected as position_jump",
            ScenarioId::SlowDrift => "11 m in 2 s implies 5.6 m/s: second fix accepted",
            ScenarioId::DenmDisplay => "DENM with distance and no speed reaches the warning sink",
            ScenarioId::GarbageIgnored => "Malformed datagrams are dropped silently, the loop keeps receiving",
            ScenarioId::NoisyDrive => "Every injected stale/inaccurate/jump/spike fix is rejected; CAMs only carry accepted fixes",
            ScenarioId::LinkOutage => "Ticks continue while the link is down, failures are reported, beacons resume",
            ScenarioId::NearestPeers => "V2V peers ranked by distance, nearest three shown in order",
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown scenario: {0}")]
pub struct UnknownScenario(pub String);

impl FromStr for ScenarioId {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == wanted)
            .ok_or_else(|| UnknownScenario(s.to_string()))
    }
}
