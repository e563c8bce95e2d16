//! CLI-specific error types

use crate::database::WriteError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read file {0}: {1}")]
    FileReadError(PathBuf, String),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("Invalid JSON on line {line}: {message}")]
    InvalidRecord { line: usize, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Write error: {0}")]
    WriteError(#[from] WriteError),
}
