//! Car2X Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the vehicle agent core
//! run against real sockets and the system clock in production, and against
//! a virtual clock and in-memory network in simulation.
//!
//! # What gets intercepted
//!
//! - Time (`now()`, `epoch_millis()`, `sleep()`)
//! - Task spawning (`spawn()`, `spawn_cancellable()`)
//! - Network (`BeaconTransport::send_to()`, `DatagramSource::recv()`)
//! - Interface discovery (`InterfaceQuery::local_ipv4()`)
//!
//! # Example
//!
//! ```ignore
//! use car2x_env::{V2xContext, DatagramSource};
//!
//! async fn receive_loop<Ctx: V2xContext, Src: DatagramSource>(ctx: &Ctx, src: &Src) {
//!     loop {
//!         tokio::select! {
//!             datagram = src.recv() => handle(datagram),
//!             _ = ctx.sleep(Duration::from_millis(500)) => tick(),
//!         }
//!     }
//! }
//! ```

mod context;
mod error;
mod network;
mod task;
mod tokio_impl;
mod types;
mod udp;

pub use context::V2xContext;
pub use error::EnvError;
pub use network::{broadcast_address, BeaconTransport, DatagramSource, InterfaceQuery};
pub use task::{cancel_pair, CancelHandle, CancelToken, TaskHandle};
pub use tokio_impl::TokioContext;
pub use types::{Datagram, MAX_DATAGRAM_BYTES};
pub use udp::{SystemInterfaces, UdpBroadcaster, UdpListener};
