//! Receive-side sliding-window byte-rate cap.
//!
//! Exists as a test hook for exercising the congestion-control feedback loop
//! without a real lossy link: wiring this in front of the udp-reader thread lets
//! a test manufacture drops deterministically by capping throughput, and those
//! drops show up in the outgoing ACK stream exactly as a real network would
//! produce them.

use std::collections::VecDeque;
use std::time::Instant;

const WINDOW_LEN: usize = 10;

/// Tracks the last `WINDOW_LEN` received datagrams as `(bytes, timestamp)` pairs
/// and flags a datagram as over-cap once the effective rate across the window
/// exceeds a configured bytes-per-second ceiling.
pub struct RateLimiter {
    window: VecDeque<(usize, Instant)>,
    cap_bps: u64,
}

impl RateLimiter {
    pub fn new(cap_bps: u64) -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_LEN),
            cap_bps,
        }
    }

    /// Record a just-received datagram of `n_bytes`. Returns `true` if it should
    /// be treated as dropped because the window's effective rate exceeds the cap.
    pub fn record(&mut self, n_bytes: usize) -> bool {
        let now = Instant::now();
        if self.window.len() == WINDOW_LEN {
            self.window.pop_front();
        }
        self.window.push_back((n_bytes, now));

        if self.window.len() < 2 {
            return false;
        }

        let oldest_ts = self.window.front().unwrap().1;
        let span = now.saturating_duration_since(oldest_ts);
        if span.is_zero() {
            return false;
        }

        let total: usize = self.window.iter().map(|(b, _)| b).sum();
        let effective_bps = total as f64 / span.as_secs_f64();
        effective_bps > self.cap_bps as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn single_sample_never_trips_the_cap() {
        let mut rl = RateLimiter::new(1);
        assert!(!rl.record(1500));
    }

    #[test]
    fn bursting_past_a_low_cap_is_flagged() {
        let mut rl = RateLimiter::new(100);
        let mut tripped = false;
        for _ in 0..WINDOW_LEN {
            if rl.record(1500) {
                tripped = true;
            }
        }
        assert!(tripped, "1500 bytes per call should blow a 100 Bps cap");
    }

    #[test]
    fn a_generous_cap_is_never_tripped() {
        let mut rl = RateLimiter::new(10_000_000_000);
        for _ in 0..WINDOW_LEN {
            assert!(!rl.record(1500));
            sleep(Duration::from_millis(1));
        }
    }
}
