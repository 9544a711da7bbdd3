//! Thread wiring: spawns the five long-lived workers — tun-reader,
//! pacer/packer, udp-reader, interface-writer, ack-sender — and connects
//! them through the `Endpoint`'s shared queues and pacer.
//!
//! Every worker is a daemon: an unrecoverable error is logged and the process
//! aborts rather than attempting per-thread recovery.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::ack::RateController;
use crate::endpoint::Endpoint;
use crate::error::TfsError;
use crate::framing::{classify, Classified, AckFields, OUTER_HEADER_LEN, TUNMTU};
use crate::packer::Packer;
use crate::ratelimit::RateLimiter;
use crate::reassembler::Reassembler;
use crate::tun::TunDevice;

/// A shared TUN handle: the tun-reader and interface-writer threads take
/// turns reading and writing the same underlying device.
pub type SharedTun = Arc<Mutex<Box<dyn TunDevice>>>;

fn die(worker: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!(worker, %err, "unrecoverable worker error, terminating process");
    std::process::exit(1);
}

/// Spawn every worker thread enabled by `endpoint.config`. Returns the join
/// handles; the caller typically joins them all (they don't return in normal
/// operation, since the process runs until killed).
pub fn spawn(endpoint: Arc<Endpoint>, tun: SharedTun) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if endpoint.config.ingress_enabled {
        handles.push(spawn_tun_reader(Arc::clone(&endpoint), Arc::clone(&tun)));
        handles.push(spawn_pacer_packer(Arc::clone(&endpoint)));
    }
    if endpoint.config.egress_enabled {
        handles.push(spawn_udp_reader(Arc::clone(&endpoint), Arc::clone(&tun)));
        handles.push(spawn_interface_writer(Arc::clone(&endpoint), Arc::clone(&tun)));
        handles.push(spawn_ack_sender(endpoint));
    }

    handles
}

fn spawn_tun_reader(endpoint: Arc<Endpoint>, tun: SharedTun) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tun-reader".into())
        .spawn(move || {
            loop {
                let mut buf = endpoint.inner_pool.take();
                let mru = crate::buffer::MAXBUF - crate::buffer::HDRSPACE;
                let n = {
                    let mut tun = tun.lock().unwrap();
                    let scratch = buf.grow_back(mru);
                    match tun.read(scratch) {
                        Ok(n) => n,
                        Err(e) => die("tun-reader", e),
                    }
                };
                buf.shrink_back(mru - n);
                endpoint.in_q.push(buf);
            }
        })
        .expect("failed to spawn tun-reader thread")
}

fn spawn_pacer_packer(endpoint: Arc<Endpoint>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("pacer-packer".into())
        .spawn(move || {
            let mut packer = Packer::new();
            loop {
                endpoint.pacer.wait();
                let datagram = packer.build_tick(&endpoint.in_q);
                if let Err(e) = endpoint.socket.send(&datagram) {
                    tracing::warn!(%e, "outer send failed, discarding any leftover");
                    packer.discard_leftover();
                }
            }
        })
        .expect("failed to spawn pacer-packer thread")
}

fn spawn_udp_reader(endpoint: Arc<Endpoint>, tun: SharedTun) -> JoinHandle<()> {
    thread::Builder::new()
        .name("udp-reader".into())
        .spawn(move || {
            let _ = &tun; // interface writing happens on its own thread.
            let mut reassembler = Reassembler::new(Arc::clone(&endpoint.seq_state));
            let mut controller = RateController::new();
            let mut limiter = endpoint.config.congestion_rate_bps.map(RateLimiter::new);

            loop {
                let mut buf = endpoint.outer_pool.take();
                let n = {
                    let scratch = buf.grow_back(TUNMTU);
                    match endpoint.socket.recv(scratch) {
                        Ok((n, _from)) => n,
                        Err(e) => die("udp-reader", e),
                    }
                };
                buf.shrink_back(TUNMTU - n);

                if let Some(limiter) = limiter.as_mut() {
                    if limiter.record(n) {
                        tracing::debug!("datagram dropped by ingress-simulation rate cap");
                        continue;
                    }
                }

                match classify(buf.data()) {
                    Ok(Classified::Data(header)) if n == TUNMTU => {
                        buf.shrink_front(OUTER_HEADER_LEN);
                        reassembler.on_datagram(header.seq, header.offset, Arc::new(buf), &endpoint.out_q);
                    }
                    Ok(Classified::Ack(ack)) => {
                        controller.on_ack(&ack, endpoint.clock.now_ns(), &endpoint.pacer);
                    }
                    Ok(Classified::Data(_)) => {
                        tracing::debug!(n, "undersized data datagram, dropping");
                        endpoint.seq_state.lock().unwrap().drop_count += 1;
                    }
                    Err(TfsError::UndersizedDatagram { .. }) | Err(TfsError::BadVersion) => {
                        tracing::debug!("dropping malformed outer datagram");
                        endpoint.seq_state.lock().unwrap().drop_count += 1;
                    }
                    Err(e) => die("udp-reader", e),
                }
            }
        })
        .expect("failed to spawn udp-reader thread")
}

fn spawn_interface_writer(endpoint: Arc<Endpoint>, tun: SharedTun) -> JoinHandle<()> {
    thread::Builder::new()
        .name("interface-writer".into())
        .spawn(move || loop {
            let chain = endpoint.out_q.pop();
            let bytes = chain.to_contiguous();
            let mut tun = tun.lock().unwrap();
            match tun.write(&bytes) {
                Ok(n) if n == bytes.len() => {}
                Ok(n) => tracing::warn!(wrote = n, expected = bytes.len(), "short TUN write, packet dropped"),
                Err(e) => tracing::warn!(%e, "TUN write failed, packet dropped"),
            }
        })
        .expect("failed to spawn interface-writer thread")
}

fn spawn_ack_sender(endpoint: Arc<Endpoint>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("ack-sender".into())
        .spawn(move || {
            thread::sleep(crate::config::ACK_WARMUP);
            loop {
                thread::sleep(endpoint.config.ack_period);
                let snapshot = endpoint.seq_state.lock().unwrap().snapshot_and_reset();
                let Some((ack_start, ack_end, drop_count)) = snapshot else {
                    continue;
                };
                let ack = AckFields {
                    drop_count,
                    timestamp_ns: endpoint.clock.now_ns(),
                    ack_start,
                    ack_end,
                };
                if let Err(e) = endpoint.socket.send(&ack.encode()) {
                    tracing::warn!(%e, "ack send failed");
                }
            }
        })
        .expect("failed to spawn ack-sender thread")
}
