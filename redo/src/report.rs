//! Operator-facing output for a run.
//!
//! This is product output (attempt diagnostics and the final verdict) and is
//! independent of `RUST_LOG`; see [`crate::logging`] for developer tracing.

use std::io::Write;
use std::time::Duration;

use crate::core::types::{AttemptResult, ExecutionOutcome, ExitState, PredicateOutcome};

/// Receives progress events from the retry loop.
pub trait Reporter {
    fn attempt(&mut self, result: &AttemptResult, max_attempts: u32, command: &str);
    fn sleeping(&mut self, delay: Duration);
    fn finished(&mut self, outcome: &ExecutionOutcome, max_attempts: u32);
}

/// Writes human-readable reports to any writer (stdout in the binary).
pub struct WriterReporter<W: Write> {
    out: W,
    /// Omit captured stdout/stderr from per-attempt reports.
    quiet: bool,
    timeout: Duration,
}

impl<W: Write> WriterReporter<W> {
    pub fn new(out: W, quiet: bool, timeout: Duration) -> Self {
        Self {
            out,
            quiet,
            timeout,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        // A closed stdout must not turn into a failed run.
        if let Err(err) = writeln!(self.out, "{text}") {
            tracing::debug!(err = %err, "report write failed");
        }
    }
}

impl<W: Write> Reporter for WriterReporter<W> {
    fn attempt(&mut self, result: &AttemptResult, max_attempts: u32, command: &str) {
        self.line(format_args!("Attempt {}/{}:", result.attempt, max_attempts));
        self.line(format_args!("Command: {command}"));
        match &result.exit {
            ExitState::TimedOut => {
                let secs = self.timeout.as_secs_f64();
                self.line(format_args!("Exit Code: timed out after {secs} seconds"));
            }
            other => self.line(format_args!("Exit Code: {other}")),
        }
        if !self.quiet {
            self.line(format_args!("Stdout: {}", result.stdout.trim()));
            if result.stdout_truncated > 0 {
                self.line(format_args!(
                    "[stdout truncated {} bytes]",
                    result.stdout_truncated
                ));
            }
            self.line(format_args!("Stderr: {}", result.stderr.trim()));
            if result.stderr_truncated > 0 {
                self.line(format_args!(
                    "[stderr truncated {} bytes]",
                    result.stderr_truncated
                ));
            }
        }
        self.line(format_args!("Duration: {:.2}s", result.elapsed.as_secs_f64()));
        match &result.outcome {
            PredicateOutcome::Satisfied => self.line(format_args!("Condition met.")),
            PredicateOutcome::NotSatisfied | PredicateOutcome::NotEvaluated => {
                self.line(format_args!("Condition not met."));
            }
            PredicateOutcome::Error(msg) => {
                self.line(format_args!("Condition error: {msg}"));
            }
        }
    }

    fn sleeping(&mut self, delay: Duration) {
        self.line(format_args!(
            "Sleeping for {:.2} seconds before next attempt...",
            delay.as_secs_f64()
        ));
    }

    fn finished(&mut self, outcome: &ExecutionOutcome, max_attempts: u32) {
        match outcome {
            ExecutionOutcome::Succeeded { attempt } => {
                self.line(format_args!("Succeeded on attempt {attempt}/{max_attempts}."));
            }
            ExecutionOutcome::ExhaustedAttempts { attempts } => {
                self.line(format_args!(
                    "Maximum attempts ({attempts}) reached without success."
                ));
            }
            ExecutionOutcome::Aborted { attempt } => {
                self.line(format_args!("Interrupted during attempt {attempt}; aborting."));
            }
        }
        if let Err(err) = self.out.flush() {
            tracing::debug!(err = %err, "report flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit: ExitState, outcome: PredicateOutcome) -> AttemptResult {
        AttemptResult {
            attempt: 2,
            exit,
            stdout: "  hello\n".to_string(),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            elapsed: Duration::from_millis(1500),
            outcome,
        }
    }

    fn render(quiet: bool, f: impl FnOnce(&mut WriterReporter<Vec<u8>>)) -> String {
        let mut reporter = WriterReporter::new(Vec::new(), quiet, Duration::from_secs(10));
        f(&mut reporter);
        String::from_utf8(reporter.into_inner()).expect("utf8")
    }

    #[test]
    fn attempt_report_lists_command_and_streams() {
        let text = render(false, |r| {
            r.attempt(
                &result(ExitState::Exited(1), PredicateOutcome::NotSatisfied),
                3,
                "false --flag",
            );
        });
        assert!(text.contains("Attempt 2/3:\n"));
        assert!(text.contains("Command: false --flag\n"));
        assert!(text.contains("Exit Code: 1\n"));
        assert!(text.contains("Stdout: hello\n"));
        assert!(text.contains("Duration: 1.50s\n"));
        assert!(text.ends_with("Condition not met.\n"));
    }

    #[test]
    fn quiet_omits_streams() {
        let text = render(true, |r| {
            r.attempt(
                &result(ExitState::Exited(0), PredicateOutcome::Satisfied),
                3,
                "true",
            );
        });
        assert!(!text.contains("Stdout:"));
        assert!(!text.contains("Stderr:"));
        assert!(text.contains("Duration: 1.50s\n"));
        assert!(text.contains("Condition met."));
    }

    #[test]
    fn timeout_and_predicate_error_are_explained() {
        let text = render(false, |r| {
            r.attempt(
                &result(ExitState::TimedOut, PredicateOutcome::NotEvaluated),
                3,
                "sleep 60",
            );
            r.attempt(
                &result(
                    ExitState::Exited(0),
                    PredicateOutcome::Error("cannot apply `<`".to_string()),
                ),
                3,
                "true",
            );
        });
        assert!(text.contains("Exit Code: timed out after 10 seconds"));
        assert!(text.contains("Condition error: cannot apply `<`"));
    }

    #[test]
    fn verdicts() {
        let text = render(false, |r| {
            r.sleeping(Duration::from_millis(20));
            r.finished(&ExecutionOutcome::Succeeded { attempt: 2 }, 5);
            r.finished(&ExecutionOutcome::ExhaustedAttempts { attempts: 5 }, 5);
        });
        assert!(text.contains("Sleeping for 0.02 seconds before next attempt..."));
        assert!(text.contains("Succeeded on attempt 2/5."));
        assert!(text.contains("Maximum attempts (5) reached without success."));
    }
}
