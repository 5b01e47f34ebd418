//! Reconnect delay table: a fixed leading schedule, then doubling, capped.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: Vec<Duration>,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// `schedule` must be non-empty (checked by config validation); an empty schedule
    /// falls back to `max` for every attempt.
    pub fn new(schedule: Vec<Duration>, max: Duration) -> Self {
        Self {
            schedule,
            max,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for a given attempt index without advancing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = attempt as usize;
        if let Some(d) = self.schedule.get(idx) {
            return (*d).min(self.max);
        }
        let Some(last) = self.schedule.last() else {
            return self.max;
        };
        let doublings = (idx + 1 - self.schedule.len()).min(31) as u32;
        last.checked_mul(1u32 << doublings)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay for the current attempt, then advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        d
    }

    /// Called after a successful handshake only.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(v: &[u64]) -> Vec<Duration> {
        v.iter().copied().map(Duration::from_secs).collect()
    }

    fn default_backoff() -> Backoff {
        Backoff::new(secs(&[1, 2, 4]), Duration::from_secs(30))
    }

    #[test]
    fn fixed_then_doubling_then_capped() {
        let mut b = default_backoff();
        let delays: Vec<Duration> = (0..8).map(|_| b.next_delay()).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 16, 30, 30, 30]));
        assert_eq!(b.attempt(), 8);
    }

    #[test]
    fn reset_restarts_from_first_delay() {
        let mut b = default_backoff();
        b.next_delay();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        let b = default_backoff();
        assert_eq!(b.delay_for(10_000), Duration::from_secs(30));
        assert_eq!(b.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn monotonic_until_cap() {
        let b = default_backoff();
        let mut prev = Duration::ZERO;
        for attempt in 0..20 {
            let d = b.delay_for(attempt);
            assert!(d >= prev);
            assert!(d <= Duration::from_secs(30));
            prev = d;
        }
    }
}
