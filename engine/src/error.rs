//! Error kinds returned by the storage engine and instance manager.
//!
//! The crate intentionally avoids a derive-macro error library: every
//! variant is hand-written with the message the caller needs, mirroring the
//! shape of `EncodingError` that the rest of this workspace's ancestry used
//! for its own internal errors.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type CResult<T> = Result<T, Error>;

/// Error kinds the core distinguishes, per the adapter-visible failure
/// surface: `NotFound` -> 404, `DuplicateId`/`AlreadyExists` -> 409,
/// `InvalidArgument` -> 400, `Conflict` -> 409 with retry hint,
/// `Cancelled` -> 499/408, `Closed`/`Internal` -> 500/503.
#[derive(Debug)]
pub enum Error {
    /// Malformed id, empty collection name, non-string `_id`.
    InvalidArgument(String),
    /// Collection or document absent/deleted/not-visible.
    NotFound(String),
    /// Duplicate collection name.
    AlreadyExists(String),
    /// Insert collides with a visible or concurrently-committing id.
    DuplicateId(String),
    /// CAS retry budget exhausted under concurrent writers.
    Conflict(String),
    /// Caller deadline or cancellation token fired mid-operation.
    Cancelled,
    /// Database or instance manager is shut down.
    Closed(String),
    /// I/O failure, corruption detected during replay, or any other
    /// condition that isn't one of the caller-actionable kinds above.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::NotFound(what) => write!(f, "not found: {what}"),
            Error::AlreadyExists(what) => write!(f, "already exists: {what}"),
            Error::DuplicateId(id) => write!(f, "duplicate id: {id}"),
            Error::Conflict(what) => write!(f, "conflict: {what}"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Closed(what) => write!(f, "closed: {what}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        assert_eq!(Error::NotFound("doc u1".into()).to_string(), "not found: doc u1");
        assert_eq!(Error::Cancelled.to_string(), "operation cancelled");
    }
}
