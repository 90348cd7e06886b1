//! Error types for herald-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for herald-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed bill, slot or file specification
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation refused because the appliance is disabled
    #[error("Feature disabled")]
    FeatureDisabled,

    #[error("Already running")]
    AlreadyRunning,

    #[error("Already stopped")]
    AlreadyStopped,

    /// Another stop-program request has not completed yet
    #[error("Stop already in progress")]
    StopAlreadyInProgress,

    /// A more urgent temporary session is active
    #[error("Preempted by higher priority session (active priority {active}, requested {requested})")]
    PreemptedByHigherPriority { active: u8, requested: u8 },

    /// Playback engine errors (missing file, unsupported format, device failure)
    #[error("Playback error: {0}")]
    Playback(String),

    /// Remote content could not be retrieved
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Settings store write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<herald_common::Error> for Error {
    fn from(err: herald_common::Error) -> Self {
        use herald_common::Error as Common;
        match err {
            Common::Validation(msg) => Error::Validation(msg),
            Common::Config(msg) => Error::Config(msg),
            Common::Io(e) => Error::Io(e),
            Common::InvalidInput(msg) => Error::BadRequest(msg),
        }
    }
}

/// Convenience Result type using herald-ap Error
pub type Result<T> = std::result::Result<T, Error>;
