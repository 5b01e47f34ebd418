//! Heartbeat deadlines. The connection task owns the timers; this only tracks when the next
//! ping is due and when an outstanding ping counts as lost.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            next_ping: None,
            pong_deadline: None,
        }
    }

    /// First ping one interval after authentication.
    pub fn start(&mut self, now: Instant) {
        self.next_ping = Some(now + self.interval);
        self.pong_deadline = None;
    }

    pub fn stop(&mut self) {
        self.next_ping = None;
        self.pong_deadline = None;
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    pub fn next_ping(&self) -> Option<Instant> {
        self.next_ping
    }

    pub fn pong_deadline(&self) -> Option<Instant> {
        self.pong_deadline
    }

    pub fn on_ping_sent(&mut self, now: Instant) {
        self.next_ping = Some(now + self.interval);
        self.pong_deadline = Some(now + self.timeout);
    }

    pub fn on_pong(&mut self) {
        self.pong_deadline = None;
    }
}
