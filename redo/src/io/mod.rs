//! Side-effecting helpers: child processes, signals, config files.

pub mod cancel;
pub mod config;
pub mod process;
