//! The retry backoff schedule mandated by spec §4.4.2/§8.1 (P6): `B(n) =
//! base * factor^(n-1)`, capped. This is a distinct, auditable policy from the
//! general-purpose jittered retry helper in `webhook-infra::resilience` —
//! P6 requires the exact schedule, not an approximation with jitter.

use std::time::Duration;

/// `B(n) = base * factor^(n-1)`, capped at `cap`. With the spec defaults
/// (base=1s, factor=2, cap=16s) this yields 1, 2, 4, 8, 16 seconds for
/// `n` in `[1..5]`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    factor: f64,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base_seconds: u64, factor: f64, cap_seconds: u64) -> Self {
        Self {
            base: Duration::from_secs(base_seconds),
            factor,
            cap: Duration::from_secs(cap_seconds),
        }
    }

    /// Delay between attempt `n` and attempt `n + 1`, for `n >= 1`.
    pub fn delay_after(&self, n: u32) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        let scaled = self.base.mul_f64(self.factor.powi((n - 1) as i32));
        scaled.min(self.cap)
    }

    /// The short re-enqueue delay used when the rate limiter itself is the
    /// reason an attempt was skipped (spec §4.4.2 step 2): `min(B(n+1), 5s)`.
    pub fn local_rate_limit_delay(&self, attempt_count: u32) -> Duration {
        self.delay_after(attempt_count + 1).min(Duration::from_secs(5))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(1, 2.0, 16)
    }
}
