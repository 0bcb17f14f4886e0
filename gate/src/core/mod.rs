//! Deterministic, pure logic shared by the gate.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod incremental;
pub mod paths;
pub mod pattern;
pub mod rule;
