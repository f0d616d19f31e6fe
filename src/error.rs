// src/error.rs

use std::process::ExitCode;
use thiserror::Error;

/// Core error types for pkglog
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unreadable package log
    #[error("{path}: {reason}")]
    Parse { path: String, reason: String },

    /// Filesystem mutation failed (deletion, pruning, unlog)
    #[error("{path}: {source}")]
    FileSystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Bad sort key, pattern, or conflicting options
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Bad configuration file or missing interception library
    #[error("Configuration error: {0}")]
    Config(String),

    /// A new package would be logged without any file
    #[error("{0}: No files to log")]
    NoFiles(String),

    /// The install command exited with a non-zero status
    #[error("Install command failed with status {status}")]
    CommandFailed { status: i32 },
}

impl Error {
    /// Build a parse error for a log file
    pub fn parse(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        Error::Parse {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    /// Build a filesystem error for a path
    pub fn fs(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Error::FileSystem {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Map error category to a deterministic exit code.
    ///
    /// A failed install command hands its own status back to the caller.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::CommandFailed { status } => ExitCode::from((*status).clamp(1, 255) as u8),
            Error::InvalidArgument(_) | Error::Config(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

/// Result type alias using pkglog's Error type
pub type Result<T> = std::result::Result<T, Error>;
