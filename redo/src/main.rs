//! Run a command repeatedly until it succeeds or exhausts the allowed number of attempts.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use redo::core::policy::{PolicyInput, RetryPolicy};
use redo::core::types::ExecutionOutcome;
use redo::exit_codes;
use redo::io::cancel::{CancelFlag, ThreadSleeper, spawn_signal_watcher};
use redo::io::config::load_config;
use redo::io::process::ProcessRunner;
use redo::logging;
use redo::report::WriterReporter;
use redo::retry::Retry;

#[derive(Parser, Debug)]
#[command(
    name = "redo",
    version,
    about = "Run a command repeatedly until it succeeds or exhausts the allowed number of attempts"
)]
struct Cli {
    /// Maximum number of attempts [default: 5].
    #[arg(short = 'a', long)]
    attempts: Option<u32>,

    /// Initial delay before the first retry, in seconds [default: 1].
    #[arg(short = 'd', long, value_name = "SECS", allow_negative_numbers = true)]
    delay: Option<f64>,

    /// Exponential backoff multiplier, >= 1 [default: 2].
    #[arg(short = 'b', long, allow_negative_numbers = true)]
    backoff: Option<f64>,

    /// Maximum delay between attempts before jitter, in seconds [default: 30].
    #[arg(short = 'm', long, value_name = "SECS", allow_negative_numbers = true)]
    max_delay: Option<f64>,

    /// Maximum random jitter added to each delay, in seconds [default: 0].
    #[arg(short = 'j', long, value_name = "SECS", allow_negative_numbers = true)]
    jitter: Option<f64>,

    /// Timeout for each attempt, in seconds [default: 10].
    #[arg(short = 't', long, value_name = "SECS", allow_negative_numbers = true)]
    timeout: Option<f64>,

    /// Success condition over exit_code, stdout, and stderr [default: "exit_code == 0"].
    ///
    /// Examples: `exit_code == 0`, `"ready" in stdout`,
    /// `exit_code != 2 and not (stderr contains 'fatal')`.
    #[arg(short = 'c', long, value_name = "EXPR")]
    condition: Option<String>,

    /// Seed for the jitter RNG, for reproducible delays.
    #[arg(long)]
    seed: Option<u64>,

    /// TOML file with default settings; flags override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bytes of stdout/stderr kept per attempt [default: 1048576].
    #[arg(long, value_name = "BYTES")]
    output_limit: Option<usize>,

    /// Omit captured stdout/stderr from attempt reports; exit code, duration, and
    /// condition lines are still printed.
    #[arg(short, long)]
    quiet: bool,

    /// Command to run, followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    if cli.command.is_empty() {
        bail!("no command specified");
    }
    let policy = build_policy(&cli)?;
    debug!(?policy, "policy resolved");

    let cancel = CancelFlag::new();
    spawn_signal_watcher(cancel.clone()).context("install signal handlers")?;

    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut retry = Retry {
        runner: ProcessRunner,
        sleeper: ThreadSleeper,
        rng,
        reporter: WriterReporter::new(std::io::stdout().lock(), cli.quiet, policy.timeout),
        cancel,
    };

    let code = match retry.run(&policy, &cli.command)? {
        ExecutionOutcome::Succeeded { .. } => exit_codes::OK,
        ExecutionOutcome::ExhaustedAttempts { .. } => exit_codes::FAILED,
        ExecutionOutcome::Aborted { .. } => exit_codes::INTERRUPTED,
    };
    Ok(code)
}

/// Resolve the policy: built-in defaults, then the config file, then flags.
fn build_policy(cli: &Cli) -> Result<RetryPolicy> {
    let mut input = PolicyInput::default();
    if let Some(path) = &cli.config {
        load_config(path)?.apply_to(&mut input);
    }
    if let Some(v) = cli.attempts {
        input.attempts = v;
    }
    if let Some(v) = cli.delay {
        input.delay_secs = v;
    }
    if let Some(v) = cli.backoff {
        input.backoff = v;
    }
    if let Some(v) = cli.max_delay {
        input.max_delay_secs = v;
    }
    if let Some(v) = cli.jitter {
        input.jitter_secs = v;
    }
    if let Some(v) = cli.timeout {
        input.timeout_secs = v;
    }
    if let Some(v) = &cli.condition {
        input.condition = v.clone();
    }
    if let Some(v) = cli.output_limit {
        input.output_limit_bytes = v;
    }
    RetryPolicy::from_input(&input)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["redo", "true"]);
        assert_eq!(cli.command, vec!["true"]);
        let policy = build_policy(&cli).expect("policy");
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn parse_flags_and_trailing_command() {
        let cli = Cli::parse_from([
            "redo", "-a", "3", "-d", "0.5", "-j", "0.1", "-c", "stdout contains 'ok'", "sh", "-c",
            "echo ok",
        ]);
        assert_eq!(cli.attempts, Some(3));
        assert_eq!(cli.command, vec!["sh", "-c", "echo ok"]);

        let policy = build_policy(&cli).expect("policy");
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.condition.source(), "stdout contains 'ok'");
    }

    #[test]
    fn flags_after_command_belong_to_command() {
        let cli = Cli::parse_from(["redo", "grep", "-a", "x"]);
        assert_eq!(cli.attempts, None);
        assert_eq!(cli.command, vec!["grep", "-a", "x"]);
    }

    #[test]
    fn empty_command_parses_but_is_rejected_later() {
        let cli = Cli::parse_from(["redo", "-a", "2"]);
        assert!(cli.command.is_empty());
    }

    #[test]
    fn negative_jitter_is_a_config_error() {
        let cli = Cli::parse_from(["redo", "-j", "-1", "true"]);
        assert!(build_policy(&cli).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("redo.toml");
        std::fs::write(&path, "attempts = 7\ntimeout_secs = 2.0\n").expect("write");

        let cli = Cli::parse_from([
            "redo",
            "--config",
            path.to_str().expect("utf8 path"),
            "-a",
            "2",
            "true",
        ]);
        let policy = build_policy(&cli).expect("policy");
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.timeout, Duration::from_secs(2));
    }
}
