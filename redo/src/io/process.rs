//! Runs the target command once with a timeout and bounded output capture.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::ExitState;
use crate::io::cancel::{CancelFlag, POLL_INTERVAL};

/// How long output readers may keep running after the child was killed.
///
/// A surviving grandchild can hold the pipes open indefinitely; after this
/// grace period the readers are detached and the bytes captured so far are used.
pub const KILL_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// What to run on each attempt.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Program followed by its arguments. Never empty.
    pub argv: Vec<String>,
    pub timeout: Duration,
    /// Bytes of each stream kept in memory; the rest is drained and dropped.
    pub output_limit_bytes: usize,
}

impl CommandRequest {
    /// Command line as shown to the operator.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Captured result of one finished invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit: ExitState,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Output for a process that never started.
    pub fn launch_failed(message: String, elapsed: Duration) -> Self {
        Self {
            exit: ExitState::LaunchFailed,
            stdout: Vec::new(),
            stderr: message.into_bytes(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            elapsed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(CommandOutput),
    /// The cancel flag was raised while waiting; the child has been killed.
    Cancelled,
}

/// Abstraction over command execution so the retry loop can be driven by
/// scripted results in tests.
pub trait CommandRunner {
    fn run(&self, request: &CommandRequest, cancel: &CancelFlag) -> Result<RunOutcome>;
}

/// Spawns a real child process per call.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, request: &CommandRequest, cancel: &CancelFlag) -> Result<RunOutcome> {
        run_command_with_timeout(request, cancel)
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. Once the child exits the
/// readers get until the attempt deadline to reach end-of-file (only
/// [`KILL_DRAIN_GRACE`] if the child was killed), so a backgrounded
/// grandchild holding the pipes cannot stretch the attempt. Launch failures are
/// reported as [`ExitState::LaunchFailed`] with the OS error in stderr rather
/// than as an `Err`; only failures to wait on or kill a running child are errors.
#[instrument(skip_all, fields(command = %request.display(), timeout_secs = request.timeout.as_secs_f64()))]
pub fn run_command_with_timeout(request: &CommandRequest, cancel: &CancelFlag) -> Result<RunOutcome> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("command must not be empty"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            let message = format!("failed to launch {program}: {e}");
            return Ok(RunOutcome::Finished(CommandOutput::launch_failed(
                message,
                started.elapsed(),
            )));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = request.output_limit_bytes;
    let stdout_reader = StreamReader::spawn(stdout, limit);
    let stderr_reader = StreamReader::spawn(stderr, limit);

    let deadline = started + request.timeout;
    let mut timed_out = false;
    let status = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(status) = child
            .wait_timeout(remaining.min(POLL_INTERVAL))
            .context("wait for command")?
        {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("cancelled while command running, killing");
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?;
            // Output of a cancelled attempt is never reported; leave the readers behind.
            return Ok(RunOutcome::Cancelled);
        }
        if Instant::now() >= deadline {
            warn!(
                timeout_secs = request.timeout.as_secs_f64(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            break child.wait().context("wait command after kill")?;
        }
    };

    let drain_until = if timed_out {
        Instant::now() + KILL_DRAIN_GRACE
    } else {
        deadline.max(Instant::now() + KILL_DRAIN_GRACE)
    };
    let (stdout, stdout_truncated) = stdout_reader.finish(drain_until).context("collect stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish(drain_until).context("collect stderr")?;
    let elapsed = started.elapsed();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let exit = if timed_out {
        ExitState::TimedOut
    } else {
        exit_state(status)
    };
    debug!(exit = %exit, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(RunOutcome::Finished(CommandOutput {
        exit,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        elapsed,
    }))
}

fn exit_state(status: ExitStatus) -> ExitState {
    if let Some(code) = status.code() {
        return ExitState::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitState::Signaled(signal);
        }
    }
    // No code and no signal only happens on exotic platforms; treat as failure.
    ExitState::Exited(-1)
}

/// Bytes kept from one stream plus the count of bytes dropped beyond the limit.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// A pipe drained on its own thread into a buffer shared with the caller.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    handle: thread::JoinHandle<Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&captured);
        let handle = thread::spawn(move || read_stream_limited(reader, limit, &sink));
        Self { captured, handle }
    }

    /// Wait until `until` for end-of-file, then return what was captured.
    ///
    /// A reader still blocked at `until` is detached; it exits on its own once
    /// the last process holding the pipe goes away.
    fn finish(self, until: Instant) -> Result<(Vec<u8>, usize)> {
        let Self { captured, handle } = self;
        while !handle.is_finished() {
            let Some(remaining) = until.checked_duration_since(Instant::now()) else {
                warn!("pipe still held open after command ended, detaching reader");
                return Ok(take_captured(&captured));
            };
            thread::sleep(remaining.min(Duration::from_millis(5)));
        }
        match handle.join() {
            Ok(result) => result?,
            Err(_) => return Err(anyhow!("output reader thread panicked")),
        }
        Ok(take_captured(&captured))
    }
}

fn take_captured(captured: &Mutex<Captured>) -> (Vec<u8>, usize) {
    let mut captured = captured.lock().unwrap_or_else(PoisonError::into_inner);
    (std::mem::take(&mut captured.bytes), captured.truncated)
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Captured>) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = sink
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        let remaining = limit.saturating_sub(captured.bytes.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.truncated += n.saturating_sub(keep);
        } else {
            captured.truncated += n;
        }
    }

    Ok(())
}
