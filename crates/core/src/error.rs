//! Error types for the FTL ingest server library.
//!
//! Protocol-level failures that a broadcaster must be told about (bad
//! request, unauthorized, channel in use, no ports left) are not errors
//! here — they travel as [`ResponseCode`](crate::protocol::ResponseCode)s
//! on the control connection and the connection closes. `FtlError` covers
//! everything else: transport failures, parse failures, server lifecycle
//! misuse, and failures reported by the host platform's services.

use std::fmt;

/// Errors that can occur in the FTL ingest server library.
#[derive(Debug, thiserror::Error)]
pub enum FtlError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an ingest control command.
    #[error("ingest protocol parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// [`IngestServer::start`](crate::IngestServer::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// A service capability (credential store, stream registry, preview
    /// encoder) reported a failure.
    #[error("service error: {0}")]
    Service(String),
}

/// Specific kind of ingest control protocol parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Command was empty between delimiters.
    EmptyCommand,
    /// `CONNECT` line did not match `CONNECT <channel id> $<hex digest>`.
    MalformedConnect,
    /// Command matched no known ingest command.
    UnknownCommand,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty command"),
            Self::MalformedConnect => write!(f, "malformed CONNECT command"),
            Self::UnknownCommand => write!(f, "unknown command"),
        }
    }
}

/// Convenience alias for `Result<T, FtlError>`.
pub type Result<T> = std::result::Result<T, FtlError>;
