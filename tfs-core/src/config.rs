//! Endpoint configuration: the knobs the core consumes, independent of how an
//! external launcher gathers them (CLI flags, a config file, ...).

use std::net::SocketAddr;
use std::time::Duration;

use crate::framing::TUNMTU;

/// Seconds the ack-sender waits after startup before its first tick, so it
/// never reports on a window with no observed sequences.
pub const ACK_WARMUP: Duration = Duration::from_secs(3);

/// Configuration for one tunnel endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Local address to bind the UDP socket to.
    pub listen_addr: SocketAddr,
    /// Peer address, if running in connect mode. `None` means listen mode:
    /// the peer is learned from the first received datagram.
    pub connect_addr: Option<SocketAddr>,
    /// TUN interface name to open or create.
    pub tun_name: String,
    /// Target tunnel rate, in outer datagrams per second.
    pub target_pps: u32,
    /// How often the ack-sender ticks.
    pub ack_period: Duration,
    /// Optional ingress-simulation congestion cap, in bytes per second,
    /// applied on the receive side as a test hook.
    pub congestion_rate_bps: Option<u64>,
    /// Whether the ingress (inner → outer) pipeline runs.
    pub ingress_enabled: bool,
    /// Whether the egress (outer → inner) pipeline runs.
    pub egress_enabled: bool,
}

impl EndpointConfig {
    /// Derive `target_pps` from a target bit rate, given the fixed outer
    /// datagram size.
    pub fn pps_from_bps(bits_per_second: u64) -> u32 {
        let bytes_per_second = bits_per_second / 8;
        ((bytes_per_second / TUNMTU as u64).max(1)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pps_from_bps_divides_by_outer_datagram_size() {
        let pps = EndpointConfig::pps_from_bps(1_000_000 * 8);
        assert_eq!(pps, 1_000_000 / TUNMTU as u32);
    }

    #[test]
    fn pps_from_bps_never_rounds_to_zero() {
        assert_eq!(EndpointConfig::pps_from_bps(1), 1);
    }
}
