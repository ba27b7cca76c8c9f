//! comet library crate
//!
//! Exposes the orchestration core so tests and external tooling can exercise
//! the pipeline without going through CLI startup.

pub mod batch;
pub mod cache;
pub mod config;
pub mod diff;
pub mod error;
pub mod generate;
pub mod git_ops;
pub mod sanitize;
