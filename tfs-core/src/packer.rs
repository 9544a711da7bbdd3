//! Ingress packer: multiplexes inner packets from `InQ` into fixed-size outer
//! datagrams, one per pacing tick.
//!
//! `build_tick` never blocks: a missing inner packet produces an all-pad
//! datagram rather than stalling the pacer, so the outer rate stays constant
//! regardless of inner traffic.

use crate::framing::{OuterHeader, OUTER_HEADER_LEN, OUTER_PAYLOAD_LEN, TUNMTU};
use crate::pool::PooledBuffer;
use crate::queue::BoundedQueue;
use crate::seq::SeqAlloc;

/// Inner packets shorter than this leave too little payload room to carry a
/// recognizable IPv6 length field, so packing stops and pads the rest.
const MIN_BOUNDARY_ROOM: usize = 6;

/// Packer-side in-progress state: the next sequence to emit and any inner
/// packet remainder carried over from the previous tick.
pub struct Packer {
    seq: SeqAlloc,
    leftover: Option<PooledBuffer>,
}

impl Packer {
    pub fn new() -> Self {
        Self { seq: SeqAlloc::new(), leftover: None }
    }

    /// Build one outer datagram for the current tick, pulling inner packets
    /// from `in_q` as needed. Always exactly `TUNMTU` bytes.
    pub fn build_tick(&mut self, in_q: &BoundedQueue<PooledBuffer>) -> [u8; TUNMTU] {
        let mut datagram = [0u8; TUNMTU];
        let seq = self.seq.alloc();
        let mut cursor = OUTER_HEADER_LEN;
        let mut budget = OUTER_PAYLOAD_LEN;

        let (offset, mut active) = match self.leftover.take() {
            Some(m) => (m.len().min(u16::MAX as usize) as u16, Some(m)),
            None => match in_q.try_pop() {
                Some(m) => (0u16, Some(m)),
                None => {
                    OuterHeader { seq, offset: OUTER_PAYLOAD_LEN as u16 }.encode(&mut datagram);
                    return datagram;
                }
            },
        };

        loop {
            if active.is_none() || budget <= MIN_BOUNDARY_ROOM {
                break;
            }
            let mut m = active.take().unwrap();
            let mlen = m.len();

            if mlen > budget {
                datagram[cursor..cursor + budget].copy_from_slice(&m.data()[..budget]);
                m.shrink_front(budget);
                cursor += budget;
                budget = 0;
                self.leftover = Some(m);
            } else {
                datagram[cursor..cursor + mlen].copy_from_slice(m.data());
                cursor += mlen;
                budget -= mlen;
                drop(m);
                if budget > MIN_BOUNDARY_ROOM {
                    active = in_q.try_pop();
                }
            }
        }

        OuterHeader { seq, offset }.encode(&mut datagram);
        datagram
    }

    /// Drop any carried-over remainder, e.g. after a short or failed send, to
    /// keep `seq` strictly monotonic without resending stale continuation bytes.
    pub fn discard_leftover(&mut self) {
        self.leftover = None;
    }

    pub fn has_leftover(&self) -> bool {
        self.leftover.is_some()
    }
}

impl Default for Packer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{classify, Classified};
    use crate::pool::BufferPool;

    fn inner_packet(pool: &std::sync::Arc<BufferPool>, len: usize) -> PooledBuffer {
        let mut buf = pool.take();
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        buf.extend_from_slice(&bytes);
        buf
    }

    #[test]
    fn empty_queue_emits_all_pad_datagram() {
        let q: BoundedQueue<PooledBuffer> = BoundedQueue::new(4);
        let mut packer = Packer::new();

        let dg = packer.build_tick(&q);
        assert_eq!(dg.len(), TUNMTU);
        match classify(&dg).unwrap() {
            Classified::Data(h) => {
                assert_eq!(h.seq, 1);
                assert_eq!(h.offset, OUTER_PAYLOAD_LEN as u16);
            }
            _ => panic!("expected data frame"),
        }
        assert!(dg[OUTER_HEADER_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn small_packet_is_packed_at_offset_zero_with_trailing_pad() {
        let pool = BufferPool::new(4);
        let q = BoundedQueue::new(4);
        q.push(inner_packet(&pool, 64));
        let mut packer = Packer::new();

        let dg = packer.build_tick(&q);
        match classify(&dg).unwrap() {
            Classified::Data(h) => assert_eq!(h.offset, 0),
            _ => panic!("expected data frame"),
        }
        assert_eq!(&dg[OUTER_HEADER_LEN..OUTER_HEADER_LEN + 64], &(0..64).map(|i| (i % 251) as u8).collect::<Vec<u8>>()[..]);
        assert!(dg[OUTER_HEADER_LEN + 64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_packet_spans_two_datagrams() {
        let pool = BufferPool::new(4);
        let q = BoundedQueue::new(4);
        q.push(inner_packet(&pool, 2000));
        let mut packer = Packer::new();

        let first = packer.build_tick(&q);
        match classify(&first).unwrap() {
            Classified::Data(h) => assert_eq!(h.offset, 0),
            _ => panic!("expected data frame"),
        }
        assert!(packer.has_leftover());

        let second = packer.build_tick(&q);
        match classify(&second).unwrap() {
            Classified::Data(h) => assert_eq!(h.offset, (2000 - OUTER_PAYLOAD_LEN) as u16),
            _ => panic!("expected data frame"),
        }
        assert!(!packer.has_leftover());
    }

    #[test]
    fn two_small_packets_share_one_datagram() {
        let pool = BufferPool::new(4);
        let q = BoundedQueue::new(4);
        q.push(inner_packet(&pool, 1000));
        q.push(inner_packet(&pool, 800));
        let mut packer = Packer::new();

        let dg = packer.build_tick(&q);
        match classify(&dg).unwrap() {
            Classified::Data(h) => assert_eq!(h.offset, 0),
            _ => panic!("expected data frame"),
        }
        // 1000 + 492 of the second packet fill this datagram; 308 bytes remain.
        assert!(packer.has_leftover());
    }

    #[test]
    fn discard_leftover_prevents_resend_after_a_short_write() {
        let pool = BufferPool::new(4);
        let q = BoundedQueue::new(4);
        q.push(inner_packet(&pool, 2000));
        let mut packer = Packer::new();
        packer.build_tick(&q);
        assert!(packer.has_leftover());
        packer.discard_leftover();
        assert!(!packer.has_leftover());
    }
}
