//! Error types for UIO device handling.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for UIO operations.
pub type Result<T> = std::result::Result<T, UioError>;

/// Main error type for UIO operations.
#[derive(Error, Debug)]
pub enum UioError {
    // Lifecycle / argument errors
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Device not found: {name}")]
    DeviceNotFound { name: String },

    // Metadata errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid attribute at {path:?}: {reason}")]
    InvalidAttribute { path: PathBuf, reason: String },

    // Device descriptor errors
    #[error("{operation} failed: {source}")]
    Os {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} transferred {actual} of {expected} bytes")]
    ShortTransfer { operation: &'static str, expected: usize, actual: usize },

    #[error("Timed out after {timeout:?} waiting for interrupt")]
    TimedOut { timeout: Duration },

    // Resource errors
    #[error("Out of memory allocating room for {requested} devices")]
    OutOfMemory { requested: usize },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Coarse classification of a [`UioError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong lifecycle state, bad name or bad configuration value.
    InvalidArgument,
    /// Enumeration, open, read, write, poll or mmap failure.
    Io,
    /// A bounded wait elapsed with no interrupt.
    TimedOut,
    /// Allocation failure during discovery.
    OutOfMemory,
}

impl UioError {
    /// Create an InvalidArgument error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into() }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. }
            | Self::DeviceNotFound { .. }
            | Self::InvalidConfig { .. } => ErrorKind::InvalidArgument,
            Self::IoError { .. }
            | Self::InvalidAttribute { .. }
            | Self::Os { .. }
            | Self::ShortTransfer { .. } => ErrorKind::Io,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
        }
    }

    /// The OS error code behind this error, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::IoError { source, .. } | Self::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
