// src/error.rs

use std::fmt;
use std::io;

/// Custom `Error` type for ring buffer and stream framing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backing storage could not be allocated.
    Allocation { requested: usize },
    /// The requested capacity does not round to a representable power of two.
    CapacityTooLarge(u64),
    /// Append rejected because it would not fit; nothing was written.
    BufferFull { requested: usize, remaining: usize },
    /// `remove` was called on an empty buffer.
    Empty,
    /// The buffer filled up without a delimiter in sight.
    FrameTooLarge { capacity: usize },
    /// Captures OS-specific error codes.
    OsError(u32),
    /// Represents any unexpected error.
    Unexpected,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Allocation { requested } => {
                write!(f, "Failed to allocate {} bytes of buffer storage", requested)
            }
            Error::CapacityTooLarge(requested) => {
                write!(f, "Requested capacity {} exceeds the largest supported ring", requested)
            }
            Error::BufferFull { requested, remaining } => write!(
                f,
                "Buffer full: {} bytes requested, {} bytes free",
                requested, remaining
            ),
            Error::Empty => write!(f, "Remove called on an empty buffer"),
            Error::FrameTooLarge { capacity } => {
                write!(f, "No delimiter within {} buffered bytes", capacity)
            }
            Error::OsError(code) => write!(f, "OS error with code: {}", code),
            Error::Unexpected => write!(f, "Unexpected error occurred"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::OsError(e.raw_os_error().unwrap_or(0) as u32)
    }
}

impl Error {
    /// Maps the custom `Error` type to process exit codes.
    pub fn to_status_code(&self) -> i32 {
        match self {
            Error::OsError(_) => 1,
            Error::Unexpected => 3,
            Error::Allocation { .. } => 4,
            Error::CapacityTooLarge(_) => 5,
            Error::BufferFull { .. } => 6,
            Error::Empty => 7,
            Error::FrameTooLarge { .. } => 8,
        }
    }

    /// True for errors that signal a caller bug rather than data or I/O trouble.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, Error::Empty)
    }
}
