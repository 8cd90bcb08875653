//! Retry policy: the immutable parameters of one run.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::core::predicate::Predicate;

pub const DEFAULT_ATTEMPTS: u32 = 5;
pub const DEFAULT_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_BACKOFF: f64 = 2.0;
pub const DEFAULT_MAX_DELAY_SECS: f64 = 30.0;
pub const DEFAULT_JITTER_SECS: f64 = 0.0;
pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Parameters that stay fixed for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    /// Cap applied to the exponential part of the delay (jitter is added on top).
    pub max_delay: Duration,
    /// Upper bound (exclusive) of random delay added after capping.
    pub jitter: Duration,
    /// Per-attempt wall-clock bound.
    pub timeout: Duration,
    /// Bytes of each output stream kept in memory per attempt.
    pub output_limit_bytes: usize,
    pub condition: Predicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            initial_delay: Duration::from_secs_f64(DEFAULT_DELAY_SECS),
            backoff_multiplier: DEFAULT_BACKOFF,
            max_delay: Duration::from_secs_f64(DEFAULT_MAX_DELAY_SECS),
            jitter: Duration::ZERO,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            condition: Predicate::default(),
        }
    }
}

/// Unvalidated policy inputs, as they arrive from flags or the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyInput {
    pub attempts: u32,
    pub delay_secs: f64,
    pub backoff: f64,
    pub max_delay_secs: f64,
    pub jitter_secs: f64,
    pub timeout_secs: f64,
    pub output_limit_bytes: usize,
    pub condition: String,
}

impl Default for PolicyInput {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay_secs: DEFAULT_DELAY_SECS,
            backoff: DEFAULT_BACKOFF,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            jitter_secs: DEFAULT_JITTER_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            condition: crate::core::predicate::DEFAULT_CONDITION.to_string(),
        }
    }
}

impl RetryPolicy {
    /// Validate inputs and compile the condition.
    ///
    /// Every error here is fatal: it is reported before any attempt runs.
    pub fn from_input(input: &PolicyInput) -> Result<Self> {
        if input.attempts == 0 {
            bail!("attempts must be >= 1");
        }
        if !input.backoff.is_finite() || input.backoff < 1.0 {
            bail!("backoff multiplier must be a finite number >= 1.0 (got {})", input.backoff);
        }
        if input.output_limit_bytes == 0 {
            bail!("output limit must be > 0 bytes");
        }
        let initial_delay = secs("delay", input.delay_secs)?;
        let max_delay = secs("max delay", input.max_delay_secs)?;
        let jitter = secs("jitter", input.jitter_secs)?;
        let timeout = secs("timeout", input.timeout_secs)?;
        if timeout.is_zero() {
            bail!("timeout must be > 0 seconds");
        }

        let condition = Predicate::parse(&input.condition)
            .with_context(|| format!("compile condition {:?}", input.condition))?;

        Ok(Self {
            max_attempts: input.attempts,
            initial_delay,
            backoff_multiplier: input.backoff,
            max_delay,
            jitter,
            timeout,
            output_limit_bytes: input.output_limit_bytes,
            condition,
        })
    }
}

fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("{name} must be a finite, non-negative number of seconds (got {value})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::predicate::PredicateError;

    #[test]
    fn defaults_validate() {
        let policy = RetryPolicy::from_input(&PolicyInput::default()).expect("policy");
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn rejects_zero_attempts() {
        let input = PolicyInput {
            attempts: 0,
            ..PolicyInput::default()
        };
        let err = RetryPolicy::from_input(&input).unwrap_err();
        assert!(err.to_string().contains("attempts"));
    }

    #[test]
    fn rejects_shrinking_or_nan_backoff() {
        for backoff in [0.5, f64::NAN, f64::INFINITY] {
            let input = PolicyInput {
                backoff,
                ..PolicyInput::default()
            };
            assert!(RetryPolicy::from_input(&input).is_err(), "backoff {backoff}");
        }
    }

    #[test]
    fn rejects_negative_durations() {
        let input = PolicyInput {
            jitter_secs: -0.1,
            ..PolicyInput::default()
        };
        let err = RetryPolicy::from_input(&input).unwrap_err();
        assert!(err.to_string().contains("jitter"));

        let input = PolicyInput {
            delay_secs: f64::NAN,
            ..PolicyInput::default()
        };
        assert!(RetryPolicy::from_input(&input).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let input = PolicyInput {
            timeout_secs: 0.0,
            ..PolicyInput::default()
        };
        assert!(RetryPolicy::from_input(&input).is_err());
    }

    #[test]
    fn max_delay_below_initial_is_allowed() {
        let input = PolicyInput {
            delay_secs: 5.0,
            max_delay_secs: 1.0,
            ..PolicyInput::default()
        };
        let policy = RetryPolicy::from_input(&input).expect("policy");
        assert_eq!(policy.max_delay, Duration::from_secs(1));
    }

    #[test]
    fn malformed_condition_keeps_predicate_error() {
        let input = PolicyInput {
            condition: "exit_code ==".to_string(),
            ..PolicyInput::default()
        };
        let err = RetryPolicy::from_input(&input).unwrap_err();
        assert!(err.downcast_ref::<PredicateError>().is_some());
    }
}
