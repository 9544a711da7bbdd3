//! Constant-rate pacing clock.
//!
//! `wait` blocks the calling (pacer/packer) thread until the next scheduled tick,
//! then advances the deadline by the current interval. `change_rate` is called
//! from the rate controller (running inside the udp-reader thread) and only
//! touches the interval, never the in-flight deadline, so a rate change never
//! causes a burst or a stall.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Inner {
    target_pps: u32,
    current_pps: u32,
    interval: Duration,
    next_deadline: Instant,
}

/// A shared, lockable pacing clock.
pub struct Pacer {
    inner: Mutex<Inner>,
}

impl Pacer {
    /// Create a pacer starting at `target_pps` (the ceiling `current_pps` can
    /// never exceed).
    pub fn new(target_pps: u32) -> Self {
        let target_pps = target_pps.max(1);
        let interval = interval_for(target_pps);
        Self {
            inner: Mutex::new(Inner {
                target_pps,
                current_pps: target_pps,
                interval,
                next_deadline: Instant::now() + interval,
            }),
        }
    }

    /// Block until the next tick is due, then schedule the following one.
    pub fn wait(&self) {
        let (sleep_for, overran) = {
            let st = self.inner.lock().unwrap();
            let now = Instant::now();
            if now > st.next_deadline + st.interval {
                (None, true)
            } else {
                (Some(st.next_deadline.saturating_duration_since(now)), false)
            }
        };

        if overran {
            tracing::warn!("pacer overrun, re-anchoring deadline to now");
            let mut st = self.inner.lock().unwrap();
            st.next_deadline = Instant::now();
        } else if let Some(d) = sleep_for {
            if !d.is_zero() {
                std::thread::sleep(d);
            }
        }

        let mut st = self.inner.lock().unwrap();
        let interval = st.interval;
        st.next_deadline += interval;
    }

    /// Atomically retune the rate; the current deadline is left untouched, so the
    /// next tick uses the new interval without a catch-up burst.
    pub fn change_rate(&self, new_pps: u32) {
        let mut st = self.inner.lock().unwrap();
        let clamped = new_pps.clamp(1, st.target_pps);
        st.current_pps = clamped;
        st.interval = interval_for(clamped);
    }

    pub fn current_pps(&self) -> u32 {
        self.inner.lock().unwrap().current_pps
    }

    pub fn target_pps(&self) -> u32 {
        self.inner.lock().unwrap().target_pps
    }
}

fn interval_for(pps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / pps as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_pps_starts_at_target() {
        let p = Pacer::new(100);
        assert_eq!(p.current_pps(), 100);
        assert_eq!(p.target_pps(), 100);
    }

    #[test]
    fn change_rate_is_clamped_to_target() {
        let p = Pacer::new(100);
        p.change_rate(500);
        assert_eq!(p.current_pps(), 100);
        p.change_rate(0);
        assert_eq!(p.current_pps(), 1);
    }

    #[test]
    fn wait_advances_deadline_by_interval() {
        let p = Pacer::new(1000);
        let before = p.inner.lock().unwrap().next_deadline;
        p.wait();
        let after = p.inner.lock().unwrap().next_deadline;
        assert!(after > before);
    }
}
