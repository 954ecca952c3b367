//! Car2X Deterministic Simulation Harness
//!
//! Runs the real vehicle agent against a controlled environment:
//! - **Time**: tokio's paused clock; virtual time jumps from timer to timer
//! - **Network**: in-memory outbound recorder and inbound injector with link faults
//! - **Location**: scripted fixes from a seeded noisy drive
//! - **Randomness**: every stream derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │ current-thread runtime, paused clock (SimContext)  │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │        │                                    ▲            │
//! │  ┌─────▼──────────┐   CAMs     ┌────────────┴────────┐   │
//! │  │  VehicleAgent  │──────────► │     SimNetwork      │   │
//! │  │                │◄────────── │ (inject, link up/dn)│   │
//! │  └─────▲──────────┘ DENM / V2V └─────────────────────┘   │
//! │        │ fixes                                           │
//! │  ┌─────┴──────────────────┐                              │
//! │  │ ScriptedProvider       │◄── noisy_drive(seed)         │
//! │  └────────────────────────┘                              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use car2x_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::NoisyDrive);
//! assert!(result.passed);
//! ```

mod context;
mod network;
mod provider;
mod runner;
pub mod scenarios;
pub mod trace;
mod vehicle;

pub use context::SimContext;
pub use network::{SentDatagram, SimNetwork};
pub use provider::ScriptedProvider;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use trace::{noisy_drive, DriveConfig, FaultKind, TraceSample};
pub use vehicle::{settle, SimVehicle, SIM_LOCAL_IP};
