use serde::Serialize;
use thiserror::Error;

use crate::session::SessionId;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("SSH connection failed: {0}")]
    Connect(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("No active session for connection {0}")]
    NoActiveSession(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Session I/O error: {0}")]
    Io(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    StdIo(#[from] std::io::Error),

    #[error("Russh error: {0}")]
    Russh(#[from] russh::Error),

    #[error("Russh Sftp error: {0}")]
    RusshSftp(#[from] russh_sftp::client::error::Error),
}

/// Stable cause category reported next to every failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    NotFound,
    Io,
    Transfer,
    NoActiveSession,
    InvalidRequest,
    Config,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Connect(_) | AppError::Authentication(_) => ErrorKind::Connect,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::NoActiveSession(_) => ErrorKind::NoActiveSession,
            AppError::AlreadyExists(_) | AppError::Validation(_) => ErrorKind::InvalidRequest,
            AppError::InvalidState(_)
            | AppError::Unsupported(_)
            | AppError::Io(_)
            | AppError::StdIo(_)
            | AppError::Russh(_) => ErrorKind::Io,
            AppError::Transfer(_) | AppError::RusshSftp(_) => ErrorKind::Transfer,
            AppError::Config(_) => ErrorKind::Config,
        }
    }

    /// Re-labels an error raised inside a one-shot transfer. Connect failures
    /// keep their category so callers can tell "could not reach host" apart.
    pub(crate) fn into_transfer(self) -> AppError {
        match self {
            AppError::Connect(_) | AppError::Authentication(_) | AppError::Transfer(_) => self,
            other => AppError::Transfer(other.to_string()),
        }
    }
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;
