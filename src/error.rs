use std::{io, time::Duration};

use thiserror::Error;

use crate::store::TransportError;

/// Every public operation fails with exactly one of these.
///
/// Variants carry rendered messages instead of source errors so that a single
/// clone outcome can be handed to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid repository `{input}`: {reason}")]
    InvalidRepo { input: String, reason: String },
    #[error("Clone failed: {0}")]
    CloneFailed(String),
    #[error("Cloning {identity} did not finish within {timeout:?}")]
    Timeout { identity: String, timeout: Duration },
    #[error("Repository not found or not accessible: {0}")]
    NotFound(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Commit {commit} not found in {identity}")]
    CommitNotFound { identity: String, commit: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage quota exceeded ({0}), clear some cached repositories to free space")]
    QuotaExceeded(String),
    #[error("Storage error: {0}")]
    Other(String),
}

impl CacheError {
    pub(crate) fn invalid_repo(input: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidRepo {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }

    /// A failure reading objects out of a clone that already exists.
    pub(crate) fn local_read(error: TransportError) -> Self {
        CacheError::CloneFailed(format!("reading local clone: {error}"))
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, CacheError::Store(StoreError::QuotaExceeded(_)))
    }
}

impl From<TransportError> for CacheError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotFound(message) => CacheError::NotFound(message),
            TransportError::Network(message) => CacheError::Network(message),
            TransportError::Other(message) => CacheError::CloneFailed(message),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => {
                StoreError::QuotaExceeded(error.to_string())
            }
            _ => StoreError::Other(error.to_string()),
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(error: io::Error) -> Self {
        CacheError::Store(error.into())
    }
}
