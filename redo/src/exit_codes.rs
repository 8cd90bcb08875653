//! Stable exit codes for the redo CLI.

/// The condition was met on some attempt.
pub const OK: i32 = 0;
/// Attempts were exhausted, or the command/config/condition was invalid.
pub const FAILED: i32 = 1;
/// The run was interrupted by SIGINT/SIGTERM/SIGQUIT (128 + SIGINT).
pub const INTERRUPTED: i32 = 130;
