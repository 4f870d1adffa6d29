//! Error taxonomy and catalog status codes.
//!
//! Per-item failures are attached to the offending envelope as a JSON
//! `error` property and the stream continues; only login failure and
//! stdout write failure are fatal. Every error maps to a numeric code
//! so downstream consumers can branch without parsing messages.

use thiserror::Error;

/// Catalog status codes shared with the backend protocol.
///
/// Negative by convention. Backend responses carry these directly;
/// locally-detected failures are assigned from the same space.
pub mod code {
    /// Query pagination ran off the end of the result set. Not an error.
    pub const NO_ROWS_FOUND: i32 = -808_000;
    /// Missing key, wrong JSON shape, unknown operation, malformed target.
    pub const INVALID_ARGUMENT: i32 = -816_000;
    /// Target path absent or inaccessible.
    pub const PATH_NOT_FOUND: i32 = -310_000;
    /// Collection or data object already exists.
    pub const ALREADY_EXISTS: i32 = -809_000;
    /// Caller lacks permission for the requested mutation.
    pub const PERMISSION_DENIED: i32 = -818_000;
    /// Local file or stream I/O failure for a single item.
    pub const LOCAL_IO: i32 = -311_000;
    /// Malformed or unexpected backend response.
    pub const PROTOCOL: i32 = -2;
    /// Malformed JSON at the input boundary.
    pub const STREAM: i32 = -3;
}

/// Resolve a well-known catalog status code to its symbolic name.
pub fn symbolic_name(status: i32) -> Option<&'static str> {
    match status {
        code::NO_ROWS_FOUND => Some("NO_ROWS_FOUND"),
        code::INVALID_ARGUMENT => Some("INVALID_ARGUMENT"),
        code::PATH_NOT_FOUND => Some("PATH_NOT_FOUND"),
        code::ALREADY_EXISTS => Some("ALREADY_EXISTS"),
        code::PERMISSION_DENIED => Some("PERMISSION_DENIED"),
        code::LOCAL_IO => Some("LOCAL_IO"),
        _ => None,
    }
}

/// Errors raised while executing a single request against the grid.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Path '{0}' does not exist (or lacks access permission)")]
    NotFound(String),

    /// Non-zero status returned by the storage service.
    #[error("{message}")]
    Backend {
        code: i32,
        name: Option<String>,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed JSON at the input boundary. Never annotated onto an
    /// envelope (the offending item produces no output), but carries the
    /// stream status code for logging and tallies.
    #[error("{0}")]
    Stream(String),
}

impl GridError {
    /// Build an invalid-argument error from anything printable.
    pub fn invalid(message: impl Into<String>) -> Self {
        GridError::InvalidArgument(message.into())
    }

    /// Build a backend error, resolving the symbolic name when known.
    pub fn backend(status: i32, message: impl Into<String>) -> Self {
        GridError::Backend {
            code: status,
            name: symbolic_name(status).map(str::to_owned),
            message: message.into(),
        }
    }

    /// The numeric code carried in the JSON `error` annotation.
    pub fn status(&self) -> i32 {
        match self {
            GridError::InvalidArgument(_) => code::INVALID_ARGUMENT,
            GridError::NotFound(_) => code::PATH_NOT_FOUND,
            GridError::Backend { code, .. } => *code,
            GridError::Io(_) => code::LOCAL_IO,
            GridError::Protocol(_) => code::PROTOCOL,
            GridError::Stream(_) => code::STREAM,
        }
    }

    /// True when the backend reported the end of a query result set.
    pub fn is_no_rows(&self) -> bool {
        matches!(self, GridError::Backend { code, .. } if *code == code::NO_ROWS_FOUND)
    }
}
