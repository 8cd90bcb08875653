//! Test-only doubles for driving the retry loop without real processes or sleeps.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;

use crate::core::types::{AttemptResult, ExecutionOutcome, ExitState};
use crate::io::cancel::{CancelFlag, Sleeper};
use crate::io::process::{CommandOutput, CommandRequest, CommandRunner, RunOutcome};
use crate::report::Reporter;

/// Replays scripted outcomes in order; the last one repeats once the script runs out.
pub struct ScriptedRunner {
    script: RefCell<VecDeque<RunOutcome>>,
    last: RefCell<Option<RunOutcome>>,
    calls: Cell<u32>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<RunOutcome>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            last: RefCell::new(None),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, _request: &CommandRequest, _cancel: &CancelFlag) -> Result<RunOutcome> {
        self.calls.set(self.calls.get() + 1);
        let next = self.script.borrow_mut().pop_front();
        let outcome = match next {
            Some(outcome) => {
                *self.last.borrow_mut() = Some(outcome.clone());
                outcome
            }
            None => self
                .last
                .borrow()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("scripted runner has an empty script"))?,
        };
        Ok(outcome)
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: RefCell<Vec<Duration>>,
    /// Simulate an interrupt arriving during the first sleep.
    interrupt: bool,
}

impl RecordingSleeper {
    pub fn interrupting() -> Self {
        Self {
            delays: RefCell::default(),
            interrupt: true,
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelFlag) -> bool {
        self.delays.borrow_mut().push(duration);
        if self.interrupt {
            cancel.cancel();
        }
        !cancel.is_cancelled()
    }
}

/// Collects every report event.
#[derive(Default)]
pub struct RecordingReporter {
    pub attempts: Vec<AttemptResult>,
    pub sleeps: Vec<Duration>,
    pub finished: Vec<ExecutionOutcome>,
}

impl Reporter for RecordingReporter {
    fn attempt(&mut self, result: &AttemptResult, _max_attempts: u32, _command: &str) {
        self.attempts.push(result.clone());
    }

    fn sleeping(&mut self, delay: Duration) {
        self.sleeps.push(delay);
    }

    fn finished(&mut self, outcome: &ExecutionOutcome, _max_attempts: u32) {
        self.finished.push(*outcome);
    }
}

fn output(exit: ExitState, stdout: &str, stderr: &str) -> RunOutcome {
    RunOutcome::Finished(CommandOutput {
        exit,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        elapsed: Duration::from_millis(5),
    })
}

/// A process that exited with `code`.
pub fn exited(code: i32, stdout: &str, stderr: &str) -> RunOutcome {
    output(ExitState::Exited(code), stdout, stderr)
}

pub fn timed_out() -> RunOutcome {
    output(ExitState::TimedOut, "", "")
}

pub fn launch_failed(message: &str) -> RunOutcome {
    RunOutcome::Finished(CommandOutput::launch_failed(
        message.to_string(),
        Duration::ZERO,
    ))
}

pub fn cancelled() -> RunOutcome {
    RunOutcome::Cancelled
}
