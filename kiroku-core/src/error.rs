//! # Error Handling
//!
//! Error types shared by every Kiroku component.
//!
//! Variants carry enough context (sizes, paths, the underlying cause) to
//! be actionable without a debugger, and each maps to a stable code for
//! monitoring.

use thiserror::Error;

/// Result type alias for Kiroku operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for Kiroku
#[derive(Error, Debug)]
pub enum Error {
    /// The memory ceiling prevented a chunk allocation or growth.
    #[error("buffer full: requested {requested} bytes, allocated {allocated} of {max}")]
    BufferFull {
        requested: usize,
        allocated: usize,
        max: usize,
    },

    #[error("encode error: {message}")]
    Encode {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// A blocking hand-off or the flush loop was cancelled before completion.
    #[error("cancelled: {message}")]
    Cancelled { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl Error {
    /// Check if the operation can be retried as-is
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::BufferFull { .. } => true,
            Error::Io { .. } => true,
            Error::Cancelled { .. } => true,
            Error::Encode { .. } => false,
            Error::InvalidArgument { .. } => false,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::BufferFull { .. } => "BUFFER_FULL",
            Error::Encode { .. } => "ENCODE_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Cancelled { .. } => "CANCELLED",
            Error::InvalidArgument { .. } => "INVALID_ARGUMENT",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
