//! Keep-alive timer
//!
//! The timer is measured from the last packet *sent*: any outgoing packet
//! proves liveness to the broker, so PINGREQ is only needed after a quiet
//! period on our side. A PINGREQ that is not answered within the tolerance is
//! a dead connection.

use crate::types::KeepAliveConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    Idle,
    SendPing,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    config: KeepAliveConfig,
    last_sent: Instant,
    ping_sent_at: Option<Instant>,
}

impl KeepAlive {
    /// A zero interval disables keep-alive
    #[must_use]
    pub fn new(interval: Duration, config: KeepAliveConfig, now: Instant) -> Self {
        Self {
            interval,
            config,
            last_sent: now,
            ping_sent_at: None,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    pub fn on_packet_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    pub fn on_ping_sent(&mut self, now: Instant) {
        self.last_sent = now;
        self.ping_sent_at = Some(now);
    }

    pub fn on_pingresp(&mut self) {
        self.ping_sent_at = None;
    }

    #[must_use]
    pub fn awaiting_pingresp(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// When [`KeepAlive::poll`] next has something to do
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.is_enabled() {
            return None;
        }
        Some(match self.ping_sent_at {
            Some(sent) => sent + self.config.timeout(self.interval),
            None => self.last_sent + self.config.ping_interval(self.interval),
        })
    }

    #[must_use]
    pub fn poll(&self, now: Instant) -> KeepAliveAction {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => {
                if self.ping_sent_at.is_some() {
                    KeepAliveAction::TimedOut
                } else {
                    KeepAliveAction::SendPing
                }
            }
            _ => KeepAliveAction::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep_alive(secs: u64, now: Instant) -> KeepAlive {
        KeepAlive::new(Duration::from_secs(secs), KeepAliveConfig::default(), now)
    }

    #[test]
    fn test_ping_after_quiet_period() {
        let start = Instant::now();
        let ka = keep_alive(60, start);

        assert_eq!(ka.poll(start + Duration::from_secs(44)), KeepAliveAction::Idle);
        assert_eq!(
            ka.poll(start + Duration::from_secs(45)),
            KeepAliveAction::SendPing
        );
    }

    #[test]
    fn test_outgoing_traffic_rearms() {
        let start = Instant::now();
        let mut ka = keep_alive(60, start);

        ka.on_packet_sent(start + Duration::from_secs(30));
        assert_eq!(ka.poll(start + Duration::from_secs(60)), KeepAliveAction::Idle);
        assert_eq!(
            ka.next_deadline(),
            Some(start + Duration::from_secs(75))
        );
    }

    #[test]
    fn test_missing_pingresp_times_out() {
        let start = Instant::now();
        let mut ka = keep_alive(10, start);

        ka.on_ping_sent(start);
        assert!(ka.awaiting_pingresp());
        assert_eq!(ka.poll(start + Duration::from_secs(14)), KeepAliveAction::Idle);
        assert_eq!(
            ka.poll(start + Duration::from_secs(15)),
            KeepAliveAction::TimedOut
        );

        ka.on_pingresp();
        assert_eq!(
            ka.poll(start + Duration::from_secs(15)),
            KeepAliveAction::SendPing
        );
    }

    #[test]
    fn test_disabled() {
        let start = Instant::now();
        let ka = keep_alive(0, start);
        assert!(!ka.is_enabled());
        assert_eq!(ka.next_deadline(), None);
        assert_eq!(
            ka.poll(start + Duration::from_secs(3600)),
            KeepAliveAction::Idle
        );
    }
}
