//! `RUST_LOG`-driven tracing for redo, written to stderr.
//!
//! The attempt report and verdict on stdout come from [`crate::report`] and do
//! not depend on the filter. Tracing adds what the report leaves out:
//!
//! - `info`: each attempt starting, and the attempt whose condition was met.
//! - `debug`: the resolved policy, child spawn and exit with elapsed time, and
//!   every backoff delay before it is slept.
//! - `warn`: kills on timeout or interrupt, truncated output, output readers
//!   detached from a pipe a grandchild still holds, conditions that failed to
//!   evaluate, and runs that ended exhausted or aborted.
//! - `error`: programs that could not be spawned, and a failed signal watcher.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. Without `RUST_LOG` only warnings and errors show.
///
/// ```bash
/// RUST_LOG=redo=debug redo -a 3 -- curl -fsS http://localhost:8080/health
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn filter_from(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}
