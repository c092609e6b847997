use core::time::Duration;

/// Exponential back-off bounds for forecast refresh retries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// First retry delay, and the value restored after a success.
    pub floor: Duration,
    /// Retry delays never exceed this. Defaults to the steady refresh cadence.
    pub ceiling: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            floor: Duration::from_secs(120),
            ceiling: Duration::from_secs(32 * 60),
            factor: 2,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Current position in the back-off sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Backoff {
    policy: RetryPolicy,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            current: policy.floor,
            policy,
        }
    }

    /// Delay to use for the next retry without advancing.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay for this failure and grows the next one, capped at the ceiling.
    pub fn on_failure(&mut self) -> Duration {
        let used = self.current.min(self.policy.ceiling);
        self.current = used
            .checked_mul(self.policy.factor.max(1))
            .unwrap_or(self.policy.ceiling)
            .min(self.policy.ceiling);
        used
    }

    pub fn on_success(&mut self) {
        self.current = self.policy.floor;
    }
}
