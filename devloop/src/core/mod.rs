//! Deterministic, pure logic shared by the build-repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod answers;
pub mod extract;
pub mod heuristics;
pub mod log_tail;
pub mod manifest;
pub mod session;
pub mod strategy;
pub mod types;
