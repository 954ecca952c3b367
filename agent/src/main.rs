//! Car2X Vehicle Agent
//!
//! Broadcasts CAM beacons from filtered position fixes and shows DENM
//! warnings and nearby-vehicle lists received on the vehicle port.
//!
//! Position comes from an NDJSON fix trace (`--trace`); without one the
//! agent listens and waits for a fix that never arrives.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use car2x_core::{AgentConfig, AgentLinks, LocationProvider, NoLocation, VehicleAgent, VehicleId};
use car2x_env::{SystemInterfaces, TokioContext, UdpBroadcaster, UdpListener};

mod console;
mod replay;

use console::ConsoleSink;
use replay::{ReplayProvider, Trace};

/// Car2X vehicle agent
#[derive(Parser, Debug)]
#[command(name = "car2x-agent")]
#[command(about = "Broadcast CAM beacons and display DENM/V2V warnings", long_about = None)]
struct Args {
    /// Destination port for CAM broadcasts
    #[arg(long, default_value = "30001")]
    cam_port: u16,

    /// Port for inbound DENM/V2V, advertised in every CAM
    #[arg(long, default_value = "30002")]
    vehicle_port: u16,

    /// Beacon period in milliseconds
    #[arg(long, default_value = "500")]
    beacon_ms: u64,

    /// Nearby vehicles shown per V2V message
    #[arg(long, default_value = "3")]
    nearest: usize,

    /// Device identifier the vehicle id is derived from (default: /etc/machine-id)
    #[arg(long)]
    device_id: Option<String>,

    /// Local IPv4 address to advertise instead of querying the host
    #[arg(long)]
    local_ip: Option<Ipv4Addr>,

    /// NDJSON file of position fixes to replay
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Restart the trace when it ends
    #[arg(long, requires = "trace")]
    loop_trace: bool,

    /// Exit after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    duration: Option<f64>,

    /// Listen only, do not broadcast CAMs
    #[arg(long)]
    no_broadcast: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            cam_port: self.cam_port,
            vehicle_port: self.vehicle_port,
            beacon_period: Duration::from_millis(self.beacon_ms.max(1)),
            nearest_k: self.nearest,
            ..AgentConfig::default()
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

async fn wait_for_exit(duration: Option<f64>) -> Result<()> {
    match duration {
        Some(secs) => {
            let limit = Duration::try_from_secs_f64(secs.max(0.0))
                .with_context(|| format!("Invalid duration: {secs}"))?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
                _ = tokio::time::sleep(limit) => info!("Run duration elapsed"),
            }
        }
        None => tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("🚗 Car2X Agent v{}", env!("CARGO_PKG_VERSION"));
    let config = args.agent_config();
    let ctx = TokioContext::shared();

    let listener = UdpListener::bind(config.vehicle_port)
        .await
        .context("Failed to open vehicle port")?;
    let broadcaster = UdpBroadcaster::bind()
        .await
        .context("Failed to open broadcast socket")?;
    let interfaces = match args.local_ip {
        Some(ip) => SystemInterfaces::with_override(ip),
        None => SystemInterfaces::new(),
    };

    let provider: Arc<dyn LocationProvider> = match &args.trace {
        Some(path) => {
            let trace = Trace::load(path)?;
            Arc::new(ReplayProvider::new(ctx.clone(), trace, args.loop_trace))
        }
        None => {
            warn!("No fix trace given; position will stay unavailable");
            Arc::new(NoLocation)
        }
    };

    let vehicle_id = VehicleId::detect(args.device_id.as_deref());
    info!("   Vehicle ID: {}", vehicle_id);
    info!("   CAM → UDP {} every {:?}", config.cam_port, config.beacon_period);

    let console = Arc::new(ConsoleSink::stdout());
    let links = AgentLinks {
        transport: Arc::new(broadcaster),
        interfaces: Arc::new(interfaces),
        provider,
        status: console.clone(),
        warnings: console,
    };

    let mut agent = VehicleAgent::new(ctx, config, vehicle_id, links);
    agent.listen(Arc::new(listener))?;
    if args.no_broadcast {
        info!("Broadcasting disabled; listening only");
    } else {
        agent.start_broadcasting()?;
    }

    let outcome = wait_for_exit(args.duration).await;
    info!("Shutting down...");
    agent.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_agent_config() {
        let args = Args::parse_from(["car2x-agent"]);
        let config = args.agent_config();
        let defaults = AgentConfig::default();
        assert_eq!(config.cam_port, defaults.cam_port);
        assert_eq!(config.vehicle_port, defaults.vehicle_port);
        assert_eq!(config.beacon_period, defaults.beacon_period);
        assert_eq!(config.nearest_k, defaults.nearest_k);
        assert!(!args.no_broadcast);
    }

    #[test]
    fn test_flags_map_onto_config() {
        let args = Args::parse_from([
            "car2x-agent",
            "--cam-port",
            "40001",
            "--beacon-ms",
            "250",
            "--nearest",
            "5",
            "--local-ip",
            "192.168.1.7",
        ]);
        let config = args.agent_config();
        assert_eq!(config.cam_port, 40001);
        assert_eq!(config.beacon_period, Duration::from_millis(250));
        assert_eq!(config.nearest_k, 5);
        assert_eq!(args.local_ip, Some(Ipv4Addr::new(192, 168, 1, 7)));
    }

    #[test]
    fn test_loop_trace_requires_trace() {
        assert!(Args::try_parse_from(["car2x-agent", "--loop-trace"]).is_err());
        assert!(Args::try_parse_from(["car2x-agent", "--trace", "drive.ndjson", "--loop-trace"]).is_ok());
    }
}
