//! Deterministic, pure logic shared by the retry loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests; randomness comes
//! in through an injected RNG.

pub mod backoff;
pub mod lexer;
pub mod policy;
pub mod predicate;
pub mod types;
