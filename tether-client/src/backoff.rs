use std::time::Duration;

use rand::Rng;

/// How the client behaves after losing its connection.
///
/// Reconnect delays double from `base_delay` per attempt, capped at
/// `max_delay`, with random jitter so a fleet of clients does not stampede
/// the broker in lockstep. After `max_attempts` consecutive failures the
/// client gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated before giving up
    pub max_attempts: u32,

    /// Delay before the first reconnect attempt
    pub base_delay: Duration,

    /// Upper bound on any reconnect delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 8,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl ReconnectPolicy {
    /// The jittered delay before the given attempt (1-based). The result
    /// falls between half the capped exponential delay and the full one.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(20);
        let uncapped = self
            .base_delay
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max_delay);
        let capped = std::cmp::min(uncapped, self.max_delay);

        let millis = capped.as_millis() as u64;
        if millis == 0 {
            return capped;
        }
        Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
    }

    /// TRUE if the policy still allows the given attempt (1-based)
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}
