//! The attempt loop.
//!
//! Each cycle runs the command, checks the condition, and either stops
//! (`Succeeded`, `ExhaustedAttempts`) or sleeps for the backoff delay and goes
//! again. An interrupt while the command runs or while sleeping ends the run as
//! `Aborted`. Attempt numbers start at 1 and increase by one per cycle; no
//! sleep follows the last attempt.

use anyhow::{Result, bail};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::core::backoff::delay_after;
use crate::core::policy::RetryPolicy;
use crate::core::predicate::{Predicate, Subject};
use crate::core::types::{AttemptResult, ExecutionOutcome, ExitState, PredicateOutcome};
use crate::io::cancel::{CancelFlag, Sleeper};
use crate::io::process::{CommandOutput, CommandRequest, CommandRunner, RunOutcome};
use crate::report::Reporter;

/// Everything the loop needs besides the policy, passed in explicitly so runs
/// share no global state.
pub struct Retry<C, S, R, P> {
    pub runner: C,
    pub sleeper: S,
    /// Source of jitter.
    pub rng: R,
    pub reporter: P,
    pub cancel: CancelFlag,
}

impl<C, S, R, P> Retry<C, S, R, P>
where
    C: CommandRunner,
    S: Sleeper,
    R: Rng,
    P: Reporter,
{
    /// Run `argv` until the policy's condition holds or attempts run out.
    ///
    /// Failed launches, timeouts, and condition errors are ordinary failed
    /// attempts. Errors are returned only for an empty command or when the
    /// runner itself fails (e.g. cannot wait on the child).
    pub fn run(&mut self, policy: &RetryPolicy, argv: &[String]) -> Result<ExecutionOutcome> {
        if argv.is_empty() {
            bail!("no command specified");
        }
        let request = CommandRequest {
            argv: argv.to_vec(),
            timeout: policy.timeout,
            output_limit_bytes: policy.output_limit_bytes,
        };
        let command = request.display();
        let max_attempts = policy.max_attempts;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Ok(self.finish(ExecutionOutcome::Aborted { attempt }, max_attempts));
            }

            info!(attempt, max_attempts, "starting attempt");
            let output = match self.runner.run(&request, &self.cancel)? {
                RunOutcome::Finished(output) => output,
                RunOutcome::Cancelled => {
                    return Ok(self.finish(ExecutionOutcome::Aborted { attempt }, max_attempts));
                }
            };

            let result = evaluate_attempt(&policy.condition, attempt, output);
            self.reporter.attempt(&result, max_attempts, &command);

            if result.outcome.is_satisfied() {
                return Ok(self.finish(ExecutionOutcome::Succeeded { attempt }, max_attempts));
            }
            if attempt >= max_attempts {
                return Ok(self.finish(
                    ExecutionOutcome::ExhaustedAttempts {
                        attempts: attempt,
                    },
                    max_attempts,
                ));
            }

            let delay = delay_after(policy, attempt, &mut self.rng);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
            self.reporter.sleeping(delay);
            if !self.sleeper.sleep(delay, &self.cancel) {
                return Ok(self.finish(ExecutionOutcome::Aborted { attempt }, max_attempts));
            }
        }
    }

    fn finish(&mut self, outcome: ExecutionOutcome, max_attempts: u32) -> ExecutionOutcome {
        match outcome {
            ExecutionOutcome::Succeeded { attempt } => info!(attempt, "condition met"),
            ExecutionOutcome::ExhaustedAttempts { attempts } => {
                warn!(attempts, "attempts exhausted");
            }
            ExecutionOutcome::Aborted { attempt } => warn!(attempt, "run aborted"),
        }
        self.reporter.finished(&outcome, max_attempts);
        outcome
    }
}

/// Decode captured output and check the condition against it.
///
/// Timed-out and launch-failed attempts are failures without evaluation.
pub fn evaluate_attempt(condition: &Predicate, attempt: u32, output: CommandOutput) -> AttemptResult {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let outcome = match output.exit {
        ExitState::TimedOut | ExitState::LaunchFailed => PredicateOutcome::NotEvaluated,
        ExitState::Exited(_) | ExitState::Signaled(_) => {
            let subject = Subject {
                exit_code: output.exit.code(),
                stdout: &stdout,
                stderr: &stderr,
            };
            match condition.evaluate(&subject) {
                Ok(true) => PredicateOutcome::Satisfied,
                Ok(false) => PredicateOutcome::NotSatisfied,
                Err(err) => {
                    warn!(attempt, err = %err, "condition evaluation failed");
                    PredicateOutcome::Error(err.to_string())
                }
            }
        }
    };

    AttemptResult {
        attempt,
        exit: output.exit,
        stdout,
        stderr,
        stdout_truncated: output.stdout_truncated,
        stderr_truncated: output.stderr_truncated,
        elapsed: output.elapsed,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::core::policy::PolicyInput;
    use crate::test_support::{
        RecordingReporter, RecordingSleeper, ScriptedRunner, cancelled, exited, launch_failed,
        timed_out,
    };

    fn policy(attempts: u32, condition: &str) -> RetryPolicy {
        RetryPolicy::from_input(&PolicyInput {
            attempts,
            delay_secs: 0.01,
            backoff: 2.0,
            max_delay_secs: 1.0,
            jitter_secs: 0.0,
            condition: condition.to_string(),
            ..PolicyInput::default()
        })
        .expect("policy")
    }

    fn retry(
        script: Vec<RunOutcome>,
    ) -> Retry<ScriptedRunner, RecordingSleeper, StdRng, RecordingReporter> {
        Retry {
            runner: ScriptedRunner::new(script),
            sleeper: RecordingSleeper::default(),
            rng: StdRng::seed_from_u64(0),
            reporter: RecordingReporter::default(),
            cancel: CancelFlag::new(),
        }
    }

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn success_on_first_attempt_never_sleeps() {
        let mut retry = retry(vec![exited(0, "", "")]);
        let outcome = retry
            .run(&policy(3, "exit_code == 0"), &argv(&["true"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempt: 1 });
        assert_eq!(retry.runner.calls(), 1);
        assert!(retry.sleeper.delays().is_empty());
        assert!(retry.reporter.sleeps.is_empty());
    }

    #[test]
    fn exhaustion_runs_every_attempt_with_growing_delays() {
        let mut retry = retry(vec![exited(1, "", "")]);
        let outcome = retry
            .run(&policy(3, "exit_code == 0"), &argv(&["false"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::ExhaustedAttempts { attempts: 3 });
        assert_eq!(retry.runner.calls(), 3);
        let delays = retry.sleeper.delays();
        assert_eq!(delays.len(), 2);
        assert!((delays[0].as_secs_f64() - 0.01).abs() < 1e-9);
        assert!((delays[1].as_secs_f64() - 0.02).abs() < 1e-9);
        // Each sleep is announced once with the delay actually slept, never after the last attempt.
        assert_eq!(retry.reporter.sleeps, delays);
        assert_eq!(retry.reporter.finished.len(), 1);
    }

    #[test]
    fn stops_at_first_success() {
        let mut retry = retry(vec![exited(1, "", ""), exited(1, "", ""), exited(0, "", "")]);
        let outcome = retry
            .run(&policy(5, "exit_code == 0"), &argv(&["flaky"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempt: 3 });
        assert_eq!(retry.runner.calls(), 3);
        assert_eq!(retry.sleeper.delays().len(), 2);
        let attempts: Vec<u32> = retry.reporter.attempts.iter().map(|a| a.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[test]
    fn condition_on_stdout_overrides_exit_code() {
        let mut retry = retry(vec![exited(1, "hello world\n", "")]);
        let outcome = retry
            .run(&policy(3, "\"hello\" in stdout"), &argv(&["greet"]))
            .expect("run");
        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempt: 1 });
    }

    #[test]
    fn timeouts_and_launch_failures_are_retried() {
        let mut retry = retry(vec![timed_out(), launch_failed("no such file"), exited(0, "", "")]);
        let outcome = retry
            .run(&policy(3, "true"), &argv(&["slow"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempt: 3 });
        let outcomes: Vec<_> = retry
            .reporter
            .attempts
            .iter()
            .map(|a| a.outcome.clone())
            .collect();
        assert_eq!(
            outcomes,
            vec![
                PredicateOutcome::NotEvaluated,
                PredicateOutcome::NotEvaluated,
                PredicateOutcome::Satisfied,
            ]
        );
        assert_eq!(retry.reporter.attempts[1].stderr, "no such file");
    }

    #[test]
    fn evaluation_error_counts_as_failure_and_keeps_going() {
        let mut retry = retry(vec![exited(0, "text", "")]);
        let outcome = retry
            .run(&policy(2, "stdout < 3"), &argv(&["cmd"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::ExhaustedAttempts { attempts: 2 });
        assert!(matches!(
            retry.reporter.attempts[0].outcome,
            PredicateOutcome::Error(_)
        ));
    }

    #[test]
    fn cancellation_while_running_aborts_without_attempt_report() {
        let mut retry = retry(vec![exited(1, "", ""), cancelled()]);
        let outcome = retry
            .run(&policy(5, "exit_code == 0"), &argv(&["cmd"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::Aborted { attempt: 2 });
        assert_eq!(retry.reporter.attempts.len(), 1);
        assert_eq!(retry.reporter.finished, vec![outcome]);
    }

    #[test]
    fn cancellation_during_sleep_aborts() {
        let mut retry = retry(vec![exited(1, "", "")]);
        retry.sleeper = RecordingSleeper::interrupting();
        let outcome = retry
            .run(&policy(5, "exit_code == 0"), &argv(&["cmd"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::Aborted { attempt: 1 });
        assert_eq!(retry.runner.calls(), 1);
    }

    #[test]
    fn already_cancelled_runs_nothing() {
        let mut retry = retry(vec![exited(0, "", "")]);
        retry.cancel.cancel();
        let outcome = retry
            .run(&policy(5, "exit_code == 0"), &argv(&["cmd"]))
            .expect("run");

        assert_eq!(outcome, ExecutionOutcome::Aborted { attempt: 1 });
        assert_eq!(retry.runner.calls(), 0);
    }

    #[test]
    fn empty_command_is_rejected() {
        let mut retry = retry(vec![exited(0, "", "")]);
        assert!(retry.run(&policy(1, "true"), &[]).is_err());
        assert_eq!(retry.runner.calls(), 0);
    }

    #[test]
    fn jitter_is_reproducible_with_seed() {
        let mut input = PolicyInput {
            attempts: 4,
            delay_secs: 0.1,
            jitter_secs: 0.5,
            ..PolicyInput::default()
        };
        input.condition = "false".to_string();
        let policy = RetryPolicy::from_input(&input).expect("policy");

        let mut a = retry(vec![exited(1, "", "")]);
        let mut b = retry(vec![exited(1, "", "")]);
        a.run(&policy, &argv(&["x"])).expect("run a");
        b.run(&policy, &argv(&["x"])).expect("run b");

        assert_eq!(a.sleeper.delays(), b.sleeper.delays());
        for (k, delay) in a.sleeper.delays().iter().enumerate() {
            let base = 0.1 * 2f64.powi(k as i32);
            assert!(delay.as_secs_f64() >= base - 1e-9);
            assert!(*delay < Duration::from_secs_f64(base + 0.5));
        }
    }

    #[test]
    fn signal_exit_code_is_negative() {
        let output = CommandOutput {
            exit: ExitState::Signaled(15),
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            elapsed: Duration::ZERO,
        };
        let condition = Predicate::parse("exit_code == -15").expect("parse");
        let result = evaluate_attempt(&condition, 1, output);
        assert_eq!(result.outcome, PredicateOutcome::Satisfied);
    }
}
