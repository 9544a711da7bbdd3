//! Free pool of reusable outer-datagram buffers.
//!
//! Buffers are allocated once at startup and then cycled between this pool and the
//! various work queues; they are never freed during steady-state operation. A
//! buffer handed out as `PooledBuffer` returns to the pool automatically when its
//! last `Arc` clone is dropped — the idiomatic-Rust form of an outer buffer whose
//! reference count (held across IOV-chain slices, see `iov.rs`) has reached zero.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::queue::BoundedQueue;

/// A pool of pre-allocated, reset `Buffer`s.
pub struct BufferPool {
    free: BoundedQueue<Buffer>,
}

impl BufferPool {
    /// Pre-allocate `count` buffers, all immediately available, behind an `Arc` so
    /// buffers taken from it can hold a pool reference for their eventual return.
    pub fn new(count: usize) -> Arc<Self> {
        let free = BoundedQueue::new(count);
        for _ in 0..count {
            free.push(Buffer::new());
        }
        Arc::new(Self { free })
    }

    /// Take a buffer from the pool, blocking if none are currently free.
    pub fn take(self: &Arc<Self>) -> PooledBuffer {
        let mut buf = self.free.pop();
        buf.reset();
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    /// Take a buffer without blocking, or `None` if the pool is exhausted.
    pub fn try_take(self: &Arc<Self>) -> Option<PooledBuffer> {
        let mut buf = self.free.try_pop()?;
        buf.reset();
        Some(PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        })
    }

    fn give(&self, buf: Buffer) {
        self.free.push(buf);
    }
}

/// A `Buffer` on loan from a `BufferPool`.
///
/// Share it across IOV-chain slices with `Arc<PooledBuffer>`; the underlying
/// buffer returns to the pool exactly once, when the last such `Arc` is dropped.
pub struct PooledBuffer {
    buf: Option<Buffer>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Buffer;
    fn deref(&self) -> &Buffer {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Buffer {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give(buf);
        }
    }
}
