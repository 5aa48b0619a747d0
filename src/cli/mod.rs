//! Command-line interface for redink.
//!
//! Provides commands for running the worker pool, submitting essays,
//! querying status, and operating the queue.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
