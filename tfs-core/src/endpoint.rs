//! The `Endpoint`: single owning struct for all per-process state.
//! Everything that would otherwise be a module-level global — the
//! pacer instance, the peer address, the buffer pools and queues, the shared
//! sequence state — lives here instead, owned by the launcher and handed to
//! each worker thread.

use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::config::EndpointConfig;
use crate::iov::IovChain;
use crate::pacer::Pacer;
use crate::pool::{BufferPool, PooledBuffer};
use crate::queue::{BoundedQueue, MAXQSZ};
use crate::reassembler::SeqState;
use crate::socket::TunnelSocket;

/// Pre-allocated buffers per pool. Generous relative to `MAXQSZ` so both
/// queues can be full while workers still hold buffers in flight.
const POOL_SIZE: usize = MAXQSZ * 2;

/// All shared state for one tunnel endpoint.
pub struct Endpoint {
    pub config: EndpointConfig,
    pub socket: Arc<TunnelSocket>,
    pub inner_pool: Arc<BufferPool>,
    pub outer_pool: Arc<BufferPool>,
    pub in_q: Arc<BoundedQueue<PooledBuffer>>,
    pub out_q: Arc<BoundedQueue<IovChain>>,
    pub pacer: Arc<Pacer>,
    pub seq_state: Arc<Mutex<SeqState>>,
    pub clock: Clock,
}

impl Endpoint {
    /// Bind the socket and allocate every shared resource described by
    /// `config`. Does not start any worker thread; see `pipeline::spawn`.
    pub fn new(config: EndpointConfig) -> std::io::Result<Self> {
        let socket = TunnelSocket::bind(config.listen_addr, config.connect_addr)?;
        Ok(Self {
            pacer: Arc::new(Pacer::new(config.target_pps)),
            socket: Arc::new(socket),
            inner_pool: BufferPool::new(POOL_SIZE),
            outer_pool: BufferPool::new(POOL_SIZE),
            in_q: Arc::new(BoundedQueue::new(MAXQSZ)),
            out_q: Arc::new(BoundedQueue::new(MAXQSZ)),
            seq_state: Arc::new(Mutex::new(SeqState::new())),
            clock: Clock::new(),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> EndpointConfig {
        EndpointConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            connect_addr: None,
            tun_name: "tfs0".to_string(),
            target_pps: 100,
            ack_period: Duration::from_secs(1),
            congestion_rate_bps: None,
            ingress_enabled: true,
            egress_enabled: true,
        }
    }

    #[test]
    fn new_binds_a_socket_and_wires_up_shared_state() {
        let ep = Endpoint::new(test_config()).unwrap();
        assert_eq!(ep.pacer.target_pps(), 100);
        assert!(ep.socket.local_addr().unwrap().port() > 0);
        assert_eq!(ep.in_q.capacity(), MAXQSZ);
    }
}
