//! Delay computation between attempts.
//!
//! The delay after attempt `k` (1-based) is `initial_delay × multiplier^(k-1)`,
//! clamped to `max_delay`, plus a uniform random amount in `[0, jitter)`. The
//! base is derived from the attempt index alone, so jitter never compounds.

use std::time::Duration;

use rand::Rng;

use crate::core::policy::RetryPolicy;

/// Exponential part of the delay after `attempt`, clamped to `max_delay`.
///
/// Overflowing or non-finite intermediate values clamp to `max_delay`.
pub fn capped_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = policy.initial_delay.as_secs_f64() * policy.backoff_multiplier.powi(exponent);
    let max_secs = policy.max_delay.as_secs_f64();

    if !secs.is_finite() || secs < 0.0 || secs > max_secs {
        policy.max_delay
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Full delay after `attempt`, including jitter drawn from `rng`.
pub fn delay_after<R: Rng>(policy: &RetryPolicy, attempt: u32, rng: &mut R) -> Duration {
    let base = capped_delay(policy, attempt);
    if policy.jitter.is_zero() {
        return base;
    }
    let extra = rng.gen_range(0.0..policy.jitter.as_secs_f64());
    base.saturating_add(Duration::from_secs_f64(extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy(delay_ms: u64, multiplier: f64, max_ms: u64, jitter_ms: u64) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(delay_ms),
            backoff_multiplier: multiplier,
            max_delay: Duration::from_millis(max_ms),
            jitter: Duration::from_millis(jitter_ms),
            ..RetryPolicy::default()
        }
    }

    fn close(actual: Duration, expected_ms: u64) -> bool {
        (actual.as_secs_f64() * 1000.0 - expected_ms as f64).abs() < 1e-6
    }

    #[test]
    fn grows_exponentially_from_first_attempt() {
        let p = policy(10, 2.0, 1000, 0);
        assert!(close(capped_delay(&p, 1), 10));
        assert!(close(capped_delay(&p, 2), 20));
        assert!(close(capped_delay(&p, 3), 40));
        assert!(close(capped_delay(&p, 5), 160));
    }

    #[test]
    fn clamps_to_max_delay() {
        let p = policy(100, 2.0, 300, 0);
        assert!(close(capped_delay(&p, 3), 300));
        assert_eq!(capped_delay(&p, u32::MAX), Duration::from_millis(300));
    }

    #[test]
    fn max_below_initial_caps_from_first_attempt() {
        let p = policy(500, 2.0, 100, 0);
        assert_eq!(capped_delay(&p, 1), Duration::from_millis(100));
    }

    #[test]
    fn multiplier_one_is_constant() {
        let p = policy(250, 1.0, 1000, 0);
        for attempt in 1..10 {
            assert!(close(capped_delay(&p, attempt), 250));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let p = policy(10, 2.0, 1000, 0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(delay_after(&p, 2, &mut rng), capped_delay(&p, 2));
    }

    #[test]
    fn jitter_stays_in_half_open_range_above_cap() {
        let p = policy(100, 2.0, 150, 50);
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..50 {
            let base = capped_delay(&p, attempt);
            let delay = delay_after(&p, attempt, &mut rng);
            assert!(delay >= base);
            assert!(delay < base + Duration::from_millis(50));
        }
    }

    #[test]
    fn same_seed_gives_same_delays() {
        let p = policy(100, 2.0, 10_000, 500);
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let first: Vec<_> = (1..6).map(|k| delay_after(&p, k, &mut a)).collect();
        let second: Vec<_> = (1..6).map(|k| delay_after(&p, k, &mut b)).collect();
        assert_eq!(first, second);
    }
}
