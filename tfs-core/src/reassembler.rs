//! Egress reassembler: rebuilds inner packets from a stream of outer-datagram
//! payloads, handling sequence gaps and inner-packet boundaries that cross
//! datagram edges.
//!
//! Driven iteratively over `(datagram, cursor)` rather than by recursion (a
//! datagram can legitimately contain several inner-packet boundaries back to
//! back, see the boundary-mid-datagram case below).

use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder};

use crate::buffer::{HDRSPACE, MAXBUF};
use crate::error::TfsError;
use crate::framing::is_pad_byte;
use crate::iov::IovChain;
use crate::pool::PooledBuffer;
use crate::queue::BoundedQueue;

/// Maximum reassembly unit: the largest inner packet a peer may legitimately claim.
const MRU: usize = MAXBUF - HDRSPACE;

/// Egress sequence bookkeeping, shared between the reassembler (which mutates
/// it as datagrams arrive) and the ack-sender (which snapshots and resets it
/// once per ACK period).
pub struct SeqState {
    pub start_seq: u32,
    pub last_seq: u32,
    pub drop_count: u32,
}

impl SeqState {
    pub fn new() -> Self {
        Self { start_seq: 0, last_seq: 0, drop_count: 0 }
    }

    /// Snapshot `(start_seq, last_seq, drop_count)` and reset the window;
    /// `None` if no sequence has been observed since the last reset.
    pub fn snapshot_and_reset(&mut self) -> Option<(u32, u32, u32)> {
        if self.start_seq == 0 {
            return None;
        }
        let snap = (self.start_seq, self.last_seq, self.drop_count);
        self.start_seq = 0;
        self.drop_count = 0;
        Some(snap)
    }
}

impl Default for SeqState {
    fn default() -> Self {
        Self::new()
    }
}

enum SeqOutcome {
    Duplicate,
    InOrder,
    Gap,
}

/// Reassembler in-progress state plus the shared sequence bookkeeping it
/// mutates on every datagram.
pub struct Reassembler {
    seq_state: Arc<Mutex<SeqState>>,
    current: Option<IovChain>,
    /// Bytes still needed to complete `current`; `None` while its total inner
    /// length is not yet known (the length field itself was split across a
    /// datagram boundary).
    left: Option<usize>,
}

impl Reassembler {
    pub fn new(seq_state: Arc<Mutex<SeqState>>) -> Self {
        Self { seq_state, current: None, left: None }
    }

    fn update_seq_state(&mut self, seq: u32) -> SeqOutcome {
        let mut st = self.seq_state.lock().unwrap();
        if st.last_seq != 0 && seq <= st.last_seq {
            return SeqOutcome::Duplicate;
        }
        if st.start_seq == 0 {
            st.start_seq = seq;
        }
        if st.last_seq == 0 || seq == st.last_seq + 1 {
            st.last_seq = seq;
            SeqOutcome::InOrder
        } else {
            st.drop_count += seq - (st.last_seq + 1);
            st.last_seq = seq;
            SeqOutcome::Gap
        }
    }

    /// Feed one validated, in-sequence-checked outer datagram's payload
    /// (header already stripped, so `payload_buf.len()` is the payload length
    /// `L`) with its header's `offset` field. Completed inner packets are
    /// pushed onto `out_q` as they're finished.
    pub fn on_datagram(
        &mut self,
        seq: u32,
        offset: u16,
        payload_buf: Arc<PooledBuffer>,
        out_q: &BoundedQueue<IovChain>,
    ) {
        match self.update_seq_state(seq) {
            SeqOutcome::Duplicate => return,
            SeqOutcome::Gap => {
                self.current = None;
                self.left = None;
            }
            SeqOutcome::InOrder => {}
        }

        let l = payload_buf.len();
        let off_raw = offset as usize;

        let mut cursor = if let Some(mut chain) = self.current.take() {
            if off_raw > l {
                // Case 2: the entire payload is continuation of `current`.
                let take = match self.left {
                    Some(n) => n.min(l),
                    None => l,
                };
                chain.append(&payload_buf, 0..take);
                match self.left {
                    Some(n) if take >= n => out_q.push(chain),
                    Some(n) => {
                        self.left = Some(n - take);
                        self.current = Some(chain);
                    }
                    None => self.current = Some(chain),
                }
                return;
            }
            // Case 3: the first `off_raw` bytes complete `current`; the
            // boundary the sender signalled is authoritative regardless of
            // whether `current`'s length was ever resolved from its header.
            chain.append(&payload_buf, 0..off_raw);
            out_q.push(chain);
            off_raw
        } else {
            off_raw
        };

        // Case 1, looped: a single datagram may carry several back-to-back
        // inner-packet boundaries.
        loop {
            if cursor >= l {
                break;
            }
            let payload = payload_buf.data();
            let b = payload[cursor];
            if is_pad_byte(b) {
                break;
            }

            let remaining = l - cursor;
            let version_nibble = b & 0xF0;
            let iplen = if version_nibble == 0x40 && remaining >= 4 {
                Some(BigEndian::read_u16(&payload[cursor + 2..cursor + 4]) as usize)
            } else if version_nibble == 0x60 && remaining >= 6 {
                Some(BigEndian::read_u16(&payload[cursor + 4..cursor + 6]) as usize)
            } else {
                None
            };

            match iplen {
                Some(iplen) if iplen > MRU => {
                    let err = TfsError::OversizedInner { len: iplen, mru: MRU };
                    tracing::warn!(%err, "discarding oversized inner packet claim");
                    self.current = None;
                    self.left = None;
                    break;
                }
                Some(iplen) => {
                    let mut chain = IovChain::new();
                    let take = remaining.min(iplen);
                    chain.append(&payload_buf, cursor..cursor + take);
                    cursor += take;
                    if take >= iplen {
                        out_q.push(chain);
                    } else {
                        self.left = Some(iplen - take);
                        self.current = Some(chain);
                        break;
                    }
                }
                None => {
                    // The inner-length field itself is split across the
                    // datagram boundary; buffer the tail and resolve once a
                    // future datagram's `offset` signals the real boundary.
                    let mut chain = IovChain::new();
                    chain.append(&payload_buf, cursor..l);
                    self.current = Some(chain);
                    self.left = None;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;

    fn payload_of(pool: &Arc<BufferPool>, bytes: &[u8], total_len: usize) -> Arc<PooledBuffer> {
        let mut buf = pool.take();
        buf.extend_from_slice(bytes);
        if buf.len() < total_len {
            let pad = total_len - buf.len();
            buf.grow_back(pad);
        }
        Arc::new(buf)
    }

    fn ipv4_header(total_len: u16) -> Vec<u8> {
        let mut h = vec![0x45, 0x00];
        let mut len_buf = [0u8; 2];
        BigEndian::write_u16(&mut len_buf, total_len);
        h.extend_from_slice(&len_buf);
        h
    }

    #[test]
    fn one_small_packet_completes_within_a_single_datagram() {
        let pool = BufferPool::new(4);
        let q: BoundedQueue<IovChain> = BoundedQueue::new(4);
        let seq_state = Arc::new(Mutex::new(SeqState::new()));
        let mut r = Reassembler::new(seq_state);

        let mut body = ipv4_header(64);
        body.extend(std::iter::repeat(0xAB).take(64 - body.len()));
        let payload = payload_of(&pool, &body, 1492);

        r.on_datagram(1, 0, payload, &q);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().len(), 64);
    }

    #[test]
    fn packet_spanning_two_datagrams_completes_on_the_second() {
        let pool = BufferPool::new(4);
        let q: BoundedQueue<IovChain> = BoundedQueue::new(4);
        let seq_state = Arc::new(Mutex::new(SeqState::new()));
        let mut r = Reassembler::new(seq_state);

        let mut head = ipv4_header(2000);
        head.extend(std::iter::repeat(0x11).take(1492 - head.len()));
        let first = payload_of(&pool, &head, 1492);
        r.on_datagram(1, 0, first, &q);
        assert!(q.try_pop().is_none());

        let tail = vec![0x22u8; 508];
        let second = payload_of(&pool, &tail, 1492);
        r.on_datagram(2, 508, second, &q);
        assert_eq!(q.pop().len(), 2000);
    }

    #[test]
    fn two_packets_sharing_one_datagram_both_complete() {
        let pool = BufferPool::new(4);
        let q: BoundedQueue<IovChain> = BoundedQueue::new(4);
        let seq_state = Arc::new(Mutex::new(SeqState::new()));
        let mut r = Reassembler::new(seq_state);

        let mut a = ipv4_header(1000);
        a.extend(std::iter::repeat(0x33).take(1000 - a.len()));
        let mut b_head = ipv4_header(800);
        b_head.extend(std::iter::repeat(0x44).take(492 - b_head.len()));
        let mut dg1 = a;
        dg1.extend(b_head);
        let first = payload_of(&pool, &dg1, 1492);
        r.on_datagram(1, 0, first, &q);
        assert_eq!(q.pop().len(), 1000);
        assert!(q.try_pop().is_none());

        let tail = vec![0x44u8; 308];
        let second = payload_of(&pool, &tail, 1492);
        r.on_datagram(2, 308, second, &q);
        assert_eq!(q.pop().len(), 800);
    }

    #[test]
    fn a_gap_abandons_the_in_progress_packet() {
        let pool = BufferPool::new(4);
        let q: BoundedQueue<IovChain> = BoundedQueue::new(4);
        let seq_state = Arc::new(Mutex::new(SeqState::new()));
        let mut r = Reassembler::new(Arc::clone(&seq_state));

        r.on_datagram(1, 1492, payload_of(&pool, &[], 1492), &q);

        let mut head = ipv4_header(3000);
        head.extend(std::iter::repeat(0x55).take(1492 - head.len()));
        r.on_datagram(2, 0, payload_of(&pool, &head, 1492), &q);
        assert!(q.try_pop().is_none());

        // seq 3 dropped in transit; seq 4 arrives next.
        r.on_datagram(4, 1492, payload_of(&pool, &[], 1492), &q);
        assert!(q.try_pop().is_none(), "partial packet from seq 2 must not be delivered");
        assert_eq!(seq_state.lock().unwrap().drop_count, 1);
        assert_eq!(seq_state.lock().unwrap().last_seq, 4);
    }

    #[test]
    fn pad_only_datagram_advances_nothing() {
        let pool = BufferPool::new(4);
        let q: BoundedQueue<IovChain> = BoundedQueue::new(4);
        let seq_state = Arc::new(Mutex::new(SeqState::new()));
        let mut r = Reassembler::new(seq_state);

        r.on_datagram(1, 1492, payload_of(&pool, &[], 1492), &q);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn an_oversized_ip_length_claim_is_discarded() {
        let pool = BufferPool::new(4);
        let q: BoundedQueue<IovChain> = BoundedQueue::new(4);
        let seq_state = Arc::new(Mutex::new(SeqState::new()));
        let mut r = Reassembler::new(Arc::clone(&seq_state));

        let mut bogus = ipv4_header(60000);
        bogus.extend(std::iter::repeat(0x66).take(1492 - bogus.len()));
        r.on_datagram(1, 0, payload_of(&pool, &bogus, 1492), &q);
        assert!(q.try_pop().is_none(), "oversized claim must not be delivered");

        let mut body = ipv4_header(64);
        body.extend(std::iter::repeat(0xAB).take(64 - body.len()));
        r.on_datagram(2, 0, payload_of(&pool, &body, 1492), &q);
        assert_eq!(q.pop().len(), 64, "reassembler must recover on the next datagram");
    }

    #[test]
    fn duplicate_sequence_is_dropped() {
        let pool = BufferPool::new(4);
        let q: BoundedQueue<IovChain> = BoundedQueue::new(4);
        let seq_state = Arc::new(Mutex::new(SeqState::new()));
        let mut r = Reassembler::new(Arc::clone(&seq_state));

        r.on_datagram(5, 1492, payload_of(&pool, &[], 1492), &q);
        r.on_datagram(5, 1492, payload_of(&pool, &[], 1492), &q);
        assert_eq!(seq_state.lock().unwrap().last_seq, 5);
    }

    #[test]
    fn ack_window_snapshot_resets_start_seq_and_drop_count() {
        let mut st = SeqState::new();
        st.start_seq = 10;
        st.last_seq = 20;
        st.drop_count = 3;
        assert_eq!(st.snapshot_and_reset(), Some((10, 20, 3)));
        assert_eq!(st.start_seq, 0);
        assert_eq!(st.drop_count, 0);
        assert_eq!(st.last_seq, 20);
        assert_eq!(st.snapshot_and_reset(), None);
    }
}
