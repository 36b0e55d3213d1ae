//! Four-stage content chain with contract validation and bounded retry.
//!
//! A seed (niche, trend source, notes, hook style, platform) flows through
//! `summarizeTrend → generateIdeas → writeHooks → estimatePerformance`. Each
//! stage reply must satisfy a JSON contract; a failing stage is retried once
//! with a clarification naming the failure, and a second failure aborts the
//! run with a fixed fallback text.
//!
//! - **[`core`]**: Pure, deterministic logic (contracts, stage table, state machine).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (model and tool commands, recorders, config).
//!   Behind traits so tests can script them.
//!
//! Orchestration modules ([`executor`], [`retry`], [`chain`]) combine the two.

pub mod chain;
pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod prompt;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
