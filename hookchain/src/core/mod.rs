//! Deterministic, pure logic shared by the chain.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod contract;
pub mod stage;
pub mod state;
pub mod types;
