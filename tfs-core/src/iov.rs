//! IOV chain: a reassembled inner packet composed of slices borrowed from one or
//! more outer-datagram buffers, avoiding a per-byte copy on the egress hot path.

use std::io::IoSlice;
use std::ops::Range;
use std::sync::Arc;

use crate::pool::PooledBuffer;

/// One borrowed slice of an outer buffer, keeping that buffer alive via `Arc`.
struct Slice {
    buf: Arc<PooledBuffer>,
    range: Range<usize>,
}

/// An inner packet under reconstruction (or completed), as an ordered chain of
/// buffer slices plus their total byte length.
#[derive(Default)]
pub struct IovChain {
    slices: Vec<Slice>,
    total_len: usize,
}

impl IovChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes accumulated so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.total_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Append a slice `range` of `buf`'s current window, acquiring a reference on
    /// `buf` for as long as this chain (or a clone of it) lives.
    pub fn append(&mut self, buf: &Arc<PooledBuffer>, range: Range<usize>) {
        self.total_len += range.len();
        self.slices.push(Slice {
            buf: Arc::clone(buf),
            range,
        });
    }

    /// Drop all slices, releasing every buffer reference held by this chain. Each
    /// referenced buffer returns to its free pool once its last reference (across
    /// every chain and the original owner) is gone.
    pub fn reset(&mut self) {
        self.slices.clear();
        self.total_len = 0;
    }

    /// Borrowed byte slices in order, suitable for a scatter (`writev`-style) write.
    pub fn as_io_slices(&self) -> Vec<IoSlice<'_>> {
        self.slices
            .iter()
            .map(|s| IoSlice::new(&s.buf.data()[s.range.clone()]))
            .collect()
    }

    /// Copy out the full chain as one contiguous buffer.
    ///
    /// Used by TUN backends that don't support vectored writes.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len);
        for s in &self.slices {
            out.extend_from_slice(&s.buf.data()[s.range.clone()]);
        }
        out
    }
}
