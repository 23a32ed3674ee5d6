use std::time::{Duration, Instant};

use log::{debug, warn};

/// What the keepalive tracker wants done right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// The connection is healthy, nothing to send
    Idle,

    /// The keepalive interval elapsed with no outbound traffic; send a
    /// PINGREQ
    SendPing,

    /// The broker failed to answer a PINGREQ within the grace period; the
    /// connection is considered dead
    Dead,
}

/// Schedules PINGREQ probes and detects dead connections.
///
/// A ping is due once a full keepalive interval passes without any
/// outbound packet. After a ping, the broker gets half an interval of
/// grace to answer with PINGRESP; silence past that deadline means the
/// connection is dead. An interval of zero disables keepalive entirely.
#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    grace: Duration,
    last_outbound: Instant,
    ping_deadline: Option<Instant>,
}

impl Keepalive {
    pub fn new(keepalive_secs: u16, now: Instant) -> Keepalive {
        let interval = Duration::from_secs(u64::from(keepalive_secs));
        Keepalive {
            interval,
            grace: interval / 2,
            last_outbound: now,
            ping_deadline: None,
        }
    }

    /// TRUE when keepalive probing is turned off (interval of zero)
    pub fn is_disabled(&self) -> bool {
        self.interval == Duration::from_secs(0)
    }

    /// Records an outbound packet, pushing the next ping further out
    pub fn on_outbound_packet(&mut self, now: Instant) {
        self.last_outbound = now;
    }

    /// Records a PINGRESP, disarming the death deadline
    pub fn on_pingresp(&mut self) {
        debug!("PINGRESP received");
        self.ping_deadline = None;
    }

    /// Checks the clock. At most one ping is requested per quiet interval;
    /// the caller must report the PINGREQ back via `on_outbound_packet`.
    pub fn poll(&mut self, now: Instant) -> KeepaliveAction {
        if self.is_disabled() {
            return KeepaliveAction::Idle;
        }

        if let Some(deadline) = self.ping_deadline {
            if now >= deadline {
                warn!("No PINGRESP within the grace period, connection is dead");
                return KeepaliveAction::Dead;
            }
        } else if now >= self.last_outbound + self.interval {
            debug!("Keepalive interval elapsed, requesting PINGREQ");
            self.ping_deadline = Some(now + self.grace);
            return KeepaliveAction::SendPing;
        }

        KeepaliveAction::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_interval_triggers_one_ping() {
        let start = Instant::now();
        let mut sut = Keepalive::new(10, start);

        assert_eq!(sut.poll(start + Duration::from_secs(9)), KeepaliveAction::Idle);
        assert_eq!(
            sut.poll(start + Duration::from_secs(10)),
            KeepaliveAction::SendPing
        );

        // only one ping per quiet interval
        assert_eq!(
            sut.poll(start + Duration::from_secs(11)),
            KeepaliveAction::Idle
        );
    }

    #[test]
    fn test_outbound_traffic_defers_the_ping() {
        let start = Instant::now();
        let mut sut = Keepalive::new(10, start);

        sut.on_outbound_packet(start + Duration::from_secs(8));

        assert_eq!(
            sut.poll(start + Duration::from_secs(12)),
            KeepaliveAction::Idle
        );
        assert_eq!(
            sut.poll(start + Duration::from_secs(18)),
            KeepaliveAction::SendPing
        );
    }

    #[test]
    fn test_pingresp_disarms_the_deadline() {
        let start = Instant::now();
        let mut sut = Keepalive::new(10, start);

        assert_eq!(
            sut.poll(start + Duration::from_secs(10)),
            KeepaliveAction::SendPing
        );
        sut.on_outbound_packet(start + Duration::from_secs(10));
        sut.on_pingresp();

        // with the deadline gone the next quiet interval pings again
        assert_eq!(
            sut.poll(start + Duration::from_secs(14)),
            KeepaliveAction::Idle
        );
        assert_eq!(
            sut.poll(start + Duration::from_secs(20)),
            KeepaliveAction::SendPing
        );
    }

    #[test]
    fn test_silence_past_grace_is_dead() {
        let start = Instant::now();
        let mut sut = Keepalive::new(10, start);

        assert_eq!(
            sut.poll(start + Duration::from_secs(10)),
            KeepaliveAction::SendPing
        );
        sut.on_outbound_packet(start + Duration::from_secs(10));

        assert_eq!(
            sut.poll(start + Duration::from_secs(14)),
            KeepaliveAction::Idle
        );
        assert_eq!(
            sut.poll(start + Duration::from_secs(15)),
            KeepaliveAction::Dead
        );
    }

    #[test]
    fn test_zero_interval_disables_keepalive() {
        let start = Instant::now();
        let mut sut = Keepalive::new(0, start);

        assert!(sut.is_disabled());
        assert_eq!(
            sut.poll(start + Duration::from_secs(3600)),
            KeepaliveAction::Idle
        );
    }
}
