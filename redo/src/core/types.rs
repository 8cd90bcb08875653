//! Shared types for attempts and run outcomes.

use std::fmt;
use std::time::Duration;

/// How a single invocation of the target command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    /// Process exited normally with this status code.
    Exited(i32),
    /// Process was terminated by a signal (unix only).
    Signaled(i32),
    /// Process exceeded the per-attempt timeout and was killed.
    TimedOut,
    /// Process could not be started; the error text is carried in stderr.
    LaunchFailed,
}

impl ExitState {
    /// Integer exit code visible to predicates.
    ///
    /// Signals map to the negated signal number. Timed-out and launch-failed
    /// attempts have no exit code.
    pub fn code(&self) -> Option<i64> {
        match self {
            ExitState::Exited(code) => Some(i64::from(*code)),
            ExitState::Signaled(signal) => Some(-i64::from(*signal)),
            ExitState::TimedOut | ExitState::LaunchFailed => None,
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "{code}"),
            ExitState::Signaled(signal) => write!(f, "killed by signal {signal}"),
            ExitState::TimedOut => write!(f, "timed out"),
            ExitState::LaunchFailed => write!(f, "failed to launch"),
        }
    }
}

/// Result of checking the success condition for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateOutcome {
    Satisfied,
    NotSatisfied,
    /// The condition could not be evaluated (e.g. a type mismatch).
    Error(String),
    /// The attempt timed out or failed to launch, so there was nothing to check.
    NotEvaluated,
}

impl PredicateOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PredicateOutcome::Satisfied)
    }
}

/// Everything observed about one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    /// 1-based attempt index.
    pub attempt: u32,
    pub exit: ExitState,
    pub stdout: String,
    pub stderr: String,
    /// Bytes dropped from stdout beyond the output limit.
    pub stdout_truncated: usize,
    /// Bytes dropped from stderr beyond the output limit.
    pub stderr_truncated: usize,
    pub elapsed: Duration,
    pub outcome: PredicateOutcome,
}

/// Terminal value of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The condition held on this attempt.
    Succeeded { attempt: u32 },
    /// All attempts ran without satisfying the condition.
    ExhaustedAttempts { attempts: u32 },
    /// An interrupt arrived during this attempt or the sleep after it.
    Aborted { attempt: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_maps_to_negative_code() {
        assert_eq!(ExitState::Signaled(9).code(), Some(-9));
        assert_eq!(ExitState::Exited(3).code(), Some(3));
    }

    #[test]
    fn timeout_and_launch_failure_have_no_code() {
        assert_eq!(ExitState::TimedOut.code(), None);
        assert_eq!(ExitState::LaunchFailed.code(), None);
    }
}
