//! AIMD rate controller driven by in-band ACK datagrams.
//!
//! Every received ACK feeds two 5-slot ring-buffer running averages (packets
//! acknowledged per window, drops per window). Once a ring completes a run the
//! controller recomputes the pacer's rate: additive increase by one when the
//! link is clean and below target, multiplicative decrease scaled by the
//! observed drop percentage otherwise.

use crate::framing::AckFields;
use crate::pacer::Pacer;

const RING_LEN: usize = 5;

/// A 5-slot ring buffer with "sum-with-min-1" aggregation: the average is the
/// integer mean over the ring length, floored up to 1 whenever any slot is
/// nonzero, so a thin-but-present signal never rounds down to invisible.
struct RingAvg {
    buf: [u32; RING_LEN],
    idx: usize,
    pushes: u64,
}

impl RingAvg {
    fn new() -> Self {
        Self { buf: [0; RING_LEN], idx: 0, pushes: 0 }
    }

    /// Push a sample, returning `true` if this push completed a run (the ring
    /// has now been fully overwritten an integral number of times).
    fn push(&mut self, value: u32) -> bool {
        self.buf[self.idx] = value;
        self.idx = (self.idx + 1) % RING_LEN;
        self.pushes += 1;
        self.pushes % RING_LEN as u64 == 0
    }

    fn average(&self) -> u32 {
        let sum: u32 = self.buf.iter().sum();
        let avg = sum / RING_LEN as u32;
        if self.buf.iter().any(|&v| v != 0) {
            avg.max(1)
        } else {
            0
        }
    }
}

/// Tracks the two ring averages and last-ACK timestamp needed to drive the
/// pacer's rate in response to received ACKs.
pub struct RateController {
    pps_avg: RingAvg,
    drop_avg: RingAvg,
    last_ack_ns: Option<u64>,
}

impl RateController {
    pub fn new() -> Self {
        Self {
            pps_avg: RingAvg::new(),
            drop_avg: RingAvg::new(),
            last_ack_ns: None,
        }
    }

    /// Process a received ACK at monotonic time `now_ns`, retuning `pacer` if
    /// this ACK completes a ring run.
    pub fn on_ack(&mut self, ack: &AckFields, now_ns: u64, pacer: &Pacer) {
        let runlen = ack.ack_end.wrapping_sub(ack.ack_start);

        let mut tick = false;
        tick |= self.pps_avg.push(runlen);
        tick |= self.drop_avg.push(ack.drop_count);

        if let Some(last_ns) = self.last_ack_ns {
            for _ in 0..self.missed_acks(now_ns, last_ns) {
                let pps_sample = self.pps_avg.average();
                let drop_sample = pps_sample / 4;
                tick |= self.pps_avg.push(pps_sample);
                tick |= self.drop_avg.push(drop_sample);
            }
        }
        self.last_ack_ns = Some(now_ns);

        if tick {
            self.apply(pacer);
        }
    }

    /// How many ACK periods appear to have been skipped between `last_ns` and
    /// `now_ns`, assuming roughly one ACK per second.
    fn missed_acks(&self, now_ns: u64, last_ns: u64) -> u64 {
        const ACK_PERIOD_NS: u64 = 1_000_000_000;
        const GRACE_NS: u64 = 100_000_000;
        let elapsed = now_ns.saturating_sub(last_ns) + GRACE_NS;
        (elapsed / ACK_PERIOD_NS).saturating_sub(1)
    }

    fn apply(&self, pacer: &Pacer) {
        let pps_avg = self.pps_avg.average();
        let drop_avg = self.drop_avg.average();
        let current = pacer.current_pps();
        let target = pacer.target_pps();

        let new_pps = if drop_avg == 0 && current < target {
            current + 1
        } else {
            let drop_pct = ((drop_avg as u64 * 25) / pps_avg.max(1) as u64).max(1);
            (((current as u64) * (100 - drop_pct.min(100))) / 100).max(1) as u32
        };

        pacer.change_rate(new_pps);
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(drop_count: u32, ack_start: u32, ack_end: u32, ts: u64) -> AckFields {
        AckFields { drop_count, timestamp_ns: ts, ack_start, ack_end }
    }

    #[test]
    fn clean_link_ramps_up_by_one_per_tick() {
        let pacer = Pacer::new(1000);
        pacer.change_rate(500);
        let mut ctrl = RateController::new();

        for i in 0..5 {
            ctrl.on_ack(&ack(0, 0, 100, i * ACK_TICK), (i + 1) * ACK_TICK, &pacer);
        }
        assert_eq!(pacer.current_pps(), 501);
    }

    const ACK_TICK: u64 = 1_000_000_000;

    #[test]
    fn sustained_drops_scale_the_rate_down() {
        let pacer = Pacer::new(2000);
        pacer.change_rate(1000);
        let mut ctrl = RateController::new();

        for i in 0..5 {
            ctrl.on_ack(&ack(250, 0, 1000, i * ACK_TICK), (i + 1) * ACK_TICK, &pacer);
        }

        // drop_avg = 250, pps_avg = 1000 => drop_pct = 250*25/1000 = 6
        // new_pps = 1000 * 94 / 100 = 940
        assert_eq!(pacer.current_pps(), 940);
    }

    #[test]
    fn a_missing_ack_injects_a_synthetic_sample_without_crashing() {
        let pacer = Pacer::new(1000);
        let mut ctrl = RateController::new();
        ctrl.on_ack(&ack(0, 0, 100, 0), 0, &pacer);
        // Jump far enough ahead to imply several missed ACK periods.
        ctrl.on_ack(&ack(0, 0, 100, 0), 5 * ACK_TICK, &pacer);
        assert!(pacer.current_pps() >= 1);
    }

    #[test]
    fn ring_average_floors_to_one_when_any_sample_nonzero() {
        let mut ring = RingAvg::new();
        ring.push(1);
        ring.push(0);
        ring.push(0);
        ring.push(0);
        let tick = ring.push(0);
        assert!(tick);
        assert_eq!(ring.average(), 1);
    }
}
