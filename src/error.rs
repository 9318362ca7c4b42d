use thiserror::Error;

use crate::store::StoreError;

/// Stable error classification exposed across the control API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    InvalidState,
    NotFound,
    Storage,
}

/// All errors surfaced by the session engine.
///
/// Messages are human-readable and never carry storage internals; callers
/// that need to branch should match on [`SessionError::kind`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Conflict(_) => ErrorKind::Conflict,
            SessionError::InvalidState(_) => ErrorKind::InvalidState,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => SessionError::NotFound(what),
            StoreError::Backend(err) => SessionError::Storage(format!("{err:#}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
