//! Subcommand implementations.

pub mod clear;
pub mod compact;
pub mod enqueue;
pub mod list;
pub mod rebuild;
pub mod retry;
pub mod run;
pub mod status;
