use std::time::Duration;

use tokio::time::Instant;

/// Keepalive timers for one open connection.
///
/// Holds two deadlines: when the next ping is due, and when the connection is
/// declared dead if nothing has arrived in the meantime. Both are cleared
/// together by [`Heartbeat::stop`].
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    next_ping: Option<Instant>,
    liveness_deadline: Option<Instant>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            next_ping: None,
            liveness_deadline: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.next_ping = Some(now + self.interval);
        self.liveness_deadline = Some(now + self.timeout);
    }

    pub fn stop(&mut self) {
        self.next_ping = None;
        self.liveness_deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    /// Push the liveness deadline forward. No-op while stopped.
    pub fn re_arm(&mut self, now: Instant) {
        if self.is_running() {
            self.liveness_deadline = Some(now + self.timeout);
        }
    }

    /// Schedule the next ping after one was sent. The liveness deadline is
    /// left alone: only inbound traffic proves the peer is responsive.
    pub fn ping_sent(&mut self, now: Instant) {
        if self.is_running() {
            self.next_ping = Some(now + self.interval);
        }
    }

    pub fn next_ping(&self) -> Option<Instant> {
        self.next_ping
    }

    pub fn liveness_deadline(&self) -> Option<Instant> {
        self.liveness_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(Duration::from_secs(15), Duration::from_secs(30))
    }

    #[test]
    fn test_start_arms_both_timers() {
        let now = Instant::now();
        let mut hb = heartbeat();
        hb.start(now);

        assert_eq!(hb.next_ping(), Some(now + Duration::from_secs(15)));
        assert_eq!(hb.liveness_deadline(), Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn test_re_arm_moves_deadline() {
        let now = Instant::now();
        let mut hb = heartbeat();
        hb.start(now);

        let later = now + Duration::from_secs(20);
        hb.re_arm(later);
        assert_eq!(hb.liveness_deadline(), Some(later + Duration::from_secs(30)));
    }

    #[test]
    fn test_ping_does_not_extend_liveness() {
        let now = Instant::now();
        let mut hb = heartbeat();
        hb.start(now);

        let tick = now + Duration::from_secs(15);
        hb.ping_sent(tick);
        assert_eq!(hb.next_ping(), Some(tick + Duration::from_secs(15)));
        assert_eq!(hb.liveness_deadline(), Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn test_stopped_heartbeat_ignores_activity() {
        let now = Instant::now();
        let mut hb = heartbeat();
        hb.start(now);
        hb.stop();

        hb.re_arm(now);
        hb.ping_sent(now);
        assert!(!hb.is_running());
        assert_eq!(hb.liveness_deadline(), None);
        assert_eq!(hb.next_ping(), None);
    }
}
