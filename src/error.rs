//! Domain error type shared by the feed engines.
//!
//! Storage failures are wrapped, not rendered: `FeedError::Internal` displays
//! a generic message and keeps the underlying [`DatabaseError`] as its
//! `source()` for logging.

use thiserror::Error;

use crate::storage::{DatabaseError, UnknownDimension};

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum FeedError {
    /// A referenced article or feed entry does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed filter value, unknown dimension, or a destructive call
    /// without its confirmation flag.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Duplicate feed entry. Matching recovers these locally.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(#[from] DatabaseError),
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::NotFound(_) => ErrorKind::NotFound,
            FeedError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FeedError::Conflict(_) => ErrorKind::Conflict,
            FeedError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FeedError::InvalidArgument(msg.into())
    }

    /// Full text for logs, including the storage cause of internal errors.
    pub fn detail(&self) -> String {
        match self {
            FeedError::Internal(source) => format!("{self}: {source}"),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for FeedError {
    fn from(e: sqlx::Error) -> Self {
        FeedError::Internal(DatabaseError::from_sqlx(e))
    }
}

impl From<UnknownDimension> for FeedError {
    fn from(e: UnknownDimension) -> Self {
        FeedError::InvalidArgument(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
