//! Command-line interface for the `writeback` binary

pub mod commands;
pub mod error;
