//! Common error types for Herald

use thiserror::Error;

/// Common result type for Herald operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the Herald crates
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed bill, slot or time specification
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
