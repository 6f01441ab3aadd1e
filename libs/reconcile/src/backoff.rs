//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff with proportional jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,

    /// Upper bound on any single delay, before jitter.
    pub max: Duration,

    /// Jitter fraction in `[0, 1]`: each delay is scaled by a factor drawn
    /// uniformly from `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Default backoff for write conflicts: short, since the competing
    /// writer has already finished by the time the conflict is observed.
    pub fn conflict() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(1), 0.5)
    }

    /// Default backoff for transient infrastructure failures: longer,
    /// since the store may need time to recover.
    pub fn infra() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10), 0.5)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let uncapped = self.base.saturating_mul(2u32.saturating_pow(exp));
        let capped = uncapped.min(self.max);
        if self.jitter == 0.0 {
            return capped;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        capped.mul_f64(factor.max(0.0))
    }
}
