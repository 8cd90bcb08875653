//! Run a command until a success condition holds, with exponential backoff.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (policy validation, condition
//!   parsing and evaluation, backoff math). No I/O.
//! - **[`io`]**: Side-effecting operations (process execution, signal handling,
//!   config files).
//!
//! [`retry`] drives the attempt loop over both, and [`report`] renders its
//! progress for the operator.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
