//! Archive error types.
//!
//! One enum covers the whole archive layer: request validation, range
//! resolution, record decoding and continuous-pull session failures. Errors
//! surfaced to a client travel as reply-channel payloads; none of them are
//! fatal to the process.

use crate::mrt::MrtError;
use thiserror::Error;

/// Errors raised by the archive layer.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Missing or malformed query parameters.
    #[error("malformed request")]
    BadRequest,

    /// Unparseable timestamp, or end earlier than start.
    #[error("dates should be in a YYYYMMDDHHMMSS format and start should be earlier than end")]
    BadDate,

    /// The catalog holds no entries.
    #[error("archive empty")]
    Empty,

    /// The request window lies entirely outside the catalog.
    #[error("no such date in archive")]
    OutOfRange,

    /// The requested window exceeds the 24-hour cap.
    #[error("the requested duration is too large, try something smaller than 24h")]
    TooLarge,

    /// No archive registered under that name.
    #[error("no such archive: {0}")]
    NotFound(String),

    /// A record failed to decode mid-stream.
    #[error("record decode error: {0}")]
    Decode(#[from] MrtError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog blob could not be read or written.
    #[error("catalog blob error: {0}")]
    Blob(String),

    /// The client IP already holds the maximum number of sessions.
    #[error("max sessions for this ip already registered")]
    SessionFull,

    /// The session ID is not registered at all.
    #[error("non-existent session id")]
    UnknownSession,

    /// The IP has sessions, but not under this ID.
    #[error("ip has sessions registered but this id is not among them: {}", .0.join(", "))]
    StrayId(Vec<String>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for ArchiveError {
    fn from(err: bincode::Error) -> Self {
        ArchiveError::Blob(err.to_string())
    }
}

/// Result type alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ArchiveError::Empty.to_string(), "archive empty");
        assert_eq!(
            ArchiveError::StrayId(vec!["a".into(), "b".into()]).to_string(),
            "ip has sessions registered but this id is not among them: a, b"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ArchiveError = io_err.into();
        assert!(matches!(err, ArchiveError::Io(_)));
    }
}
