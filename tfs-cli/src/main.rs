//! Command-line launcher for a tunnel endpoint: parses arguments, builds an
//! `EndpointConfig`, opens the TUN device, and spawns the worker pipeline.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tfs_core::config::EndpointConfig;
use tfs_core::endpoint::Endpoint;
use tfs_core::pipeline;
use tfs_core::tun::TunDevice;

/// A point-to-point IP traffic-flow-security tunnel endpoint.
#[derive(Parser, Debug)]
#[command(name = "tfs-tunnel", version, about)]
struct Args {
    /// Local UDP bind address.
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Run in connect mode against this peer; omit for listen mode (peer
    /// learned from the first received datagram).
    #[arg(long, value_name = "HOST:PORT")]
    connect: Option<SocketAddr>,

    /// TUN interface name to open.
    #[arg(long, default_value = "tfs0")]
    tun: String,

    /// Target tunnel rate, in bits per second.
    #[arg(long, default_value_t = 8_000_000)]
    rate: u64,

    /// ACK tick period, in seconds.
    #[arg(long, default_value_t = 1)]
    ack_period: u64,

    /// Ingress-simulation congestion cap for the receive-side rate limiter,
    /// in bytes per second (test hook).
    #[arg(long, value_name = "BPS")]
    congestion_rate: Option<u64>,

    /// Run only the ingress (inner -> outer) direction.
    #[arg(long, conflicts_with = "egress_only")]
    ingress_only: bool,

    /// Run only the egress (outer -> inner) direction.
    #[arg(long, conflicts_with = "ingress_only")]
    egress_only: bool,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Shorthand for maximum verbosity.
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.debug);

    let config = EndpointConfig {
        listen_addr: args.bind,
        connect_addr: args.connect,
        tun_name: args.tun.clone(),
        target_pps: EndpointConfig::pps_from_bps(args.rate),
        ack_period: Duration::from_secs(args.ack_period),
        congestion_rate_bps: args.congestion_rate,
        ingress_enabled: !args.egress_only,
        egress_enabled: !args.ingress_only,
    };

    tracing::info!(?config, "starting tunnel endpoint");

    let endpoint = Arc::new(Endpoint::new(config)?);
    let tun = open_tun(&args.tun)?;

    let handles = pipeline::spawn(endpoint, tun);
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn open_tun(name: &str) -> anyhow::Result<pipeline::SharedTun> {
    let dev = tfs_core::tun::linux::LinuxTun::open(name)?;
    Ok(Arc::new(Mutex::new(Box::new(dev) as Box<dyn TunDevice>)))
}

#[cfg(not(target_os = "linux"))]
fn open_tun(_name: &str) -> anyhow::Result<pipeline::SharedTun> {
    anyhow::bail!("a real TUN device is only supported on Linux in this build")
}

fn init_tracing(verbose: u8, debug: bool) {
    let default_level = if debug || verbose >= 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}
