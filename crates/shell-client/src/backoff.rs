//! Reconnect schedule.

use std::time::Duration;

/// Exponential reconnect schedule with a hard attempt cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before attempt 1.
    pub base: Duration,
    /// Last attempt that is still scheduled.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Policy with the given base delay and cap.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before `attempt` (1-based): `base * 2^(attempt - 1)`.
    ///
    /// `None` once `attempt` exceeds the cap or for attempt 0.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}
