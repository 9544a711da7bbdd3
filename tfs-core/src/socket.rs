//! UDP socket wrapper: owns the bound socket and the send-side mutex shared
//! between the pacer/packer thread and the ack-sender thread.
//!
//! Receive is exclusive to the udp-reader thread and needs no locking of its
//! own; `std::net::UdpSocket` already supports concurrent send/recv from
//! different threads, the mutex here only serializes the two senders against
//! each other so a packer tick and an ACK tick never interleave their bytes.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;

use crate::error::{Result, TfsError};

/// Shared UDP endpoint: one socket, one peer address, one send mutex.
///
/// In *listen* mode the peer is learned from the source address of the first
/// received datagram, with no handshake; in *connect* mode it is fixed at
/// construction.
pub struct TunnelSocket {
    socket: UdpSocket,
    send_lock: Mutex<()>,
    peer: Mutex<Option<SocketAddr>>,
}

impl TunnelSocket {
    /// Bind to `listen_addr`. If `connect_addr` is given, the peer is fixed
    /// immediately (connect mode); otherwise it is learned on first receipt.
    pub fn bind(listen_addr: SocketAddr, connect_addr: Option<SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen_addr)?;
        Ok(Self {
            socket,
            send_lock: Mutex::new(()),
            peer: Mutex::new(connect_addr),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap()
    }

    /// Block for the next datagram, returning its source address and the
    /// number of bytes written into `buf`. If no peer is fixed yet, this
    /// source address becomes the peer for all future sends.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (n, from) = self.socket.recv_from(buf)?;
        let mut peer = self.peer.lock().unwrap();
        if peer.is_none() {
            tracing::info!(%from, "learned peer address from first received datagram");
            *peer = Some(from);
        }
        Ok((n, from))
    }

    /// Send `buf` to the current peer under the shared send lock. Returns
    /// `TfsError::NoPeer` if no peer has been learned or configured yet.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        let peer = self.peer().ok_or(TfsError::NoPeer)?;
        let _guard = self.send_lock.lock().unwrap();
        let n = self.socket.send_to(buf, peer)?;
        if n != buf.len() {
            return Err(TfsError::ShortSend { wrote: n, expected: buf.len() });
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(port_hint: u16) -> SocketAddr {
        format!("127.0.0.1:{port_hint}").parse().unwrap()
    }

    #[test]
    fn connect_mode_fixes_the_peer_immediately() {
        let sock = TunnelSocket::bind(loopback(0), Some(loopback(9999))).unwrap();
        assert_eq!(sock.peer(), Some(loopback(9999)));
    }

    #[test]
    fn listen_mode_learns_peer_from_first_datagram() {
        let a = TunnelSocket::bind(loopback(0), None).unwrap();
        let b = TunnelSocket::bind(loopback(0), Some(a.local_addr().unwrap())).unwrap();
        assert!(a.peer().is_none());

        b.send(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = a.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(a.peer(), Some(from));
    }

    #[test]
    fn send_without_a_peer_is_rejected() {
        let sock = TunnelSocket::bind(loopback(0), None).unwrap();
        assert!(matches!(sock.send(b"x"), Err(TfsError::NoPeer)));
    }
}
