//! Error types shared across the core subsystem.

use std::io;

/// Errors that can be observed while running one direction of the tunnel.
///
/// Most variants are handled in place by the worker that observes them (see the
/// propagation policy); a few cause the owning worker thread to terminate the
/// process instead of continuing with corrupted sequence/pacing state.
#[derive(Debug, thiserror::Error)]
pub enum TfsError {
    /// The outer datagram was shorter than the fixed outer MTU.
    #[error("undersized outer datagram: got {got} bytes, expected {expected}")]
    UndersizedDatagram { got: usize, expected: usize },

    /// The reserved/classification word had its bad-version bit pattern set.
    #[error("malformed outer datagram: bad version bits")]
    BadVersion,

    /// The underlying socket or device I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An outer send was short (didn't cover a full `TUNMTU` datagram).
    #[error("short send: wrote {wrote} of {expected} bytes")]
    ShortSend { wrote: usize, expected: usize },

    /// An inner packet claimed a length larger than the maximum reassembly unit.
    #[error("inner packet length {len} exceeds MRU {mru}")]
    OversizedInner { len: usize, mru: usize },

    /// No peer address is known yet (egress hasn't received a first datagram).
    #[error("no peer address known yet")]
    NoPeer,
}

pub type Result<T> = std::result::Result<T, TfsError>;
