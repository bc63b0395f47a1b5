//! # Error Types for cloudcp
//!
//! Backends and the transfer engine report failures through [`FsError`] so
//! callers can react to the *kind* of failure (a missing destination, a file
//! where a directory was expected, ...). The CLI layer wraps these in
//! `anyhow` with context.

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias used across the library.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Errors produced by file-system backends and the transfer engine.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not exist.
    #[error("No such file or directory: {0}")]
    NotFound(String),

    /// A directory was found where a file was required.
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// A file was found where a directory was required.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// The path already exists.
    #[error("File exists: {0}")]
    AlreadyExists(String),

    /// The server or the OS refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The backend cannot perform the requested operation.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// A URI could not be parsed or points somewhere we cannot reach.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// A glob or ignore pattern could not be compiled.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A non-success HTTP status not covered by a more specific variant.
    #[error("HTTP {status} for {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    /// The server answered with something we could not interpret.
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// Transport level HTTP failure (connect, TLS, timeout...).
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Map a non-success HTTP status onto an error kind.
    ///
    /// `target` names the resource (for messages), `body` is the response
    /// text the server sent back, if any.
    pub fn from_status(status: StatusCode, target: &str, body: String) -> Self {
        match status {
            StatusCode::NOT_FOUND => FsError::NotFound(target.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                FsError::PermissionDenied(target.to_string())
            }
            StatusCode::CONFLICT => FsError::AlreadyExists(target.to_string()),
            _ => FsError::Http {
                status: status.as_u16(),
                url: target.to_string(),
                message: body.trim().to_string(),
            },
        }
    }

    /// Map an I/O error for `path` onto the matching kind, keeping the path
    /// in the message.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_string()),
            ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
            ErrorKind::IsADirectory => FsError::IsADirectory(path.to_string()),
            ErrorKind::NotADirectory => FsError::NotADirectory(path.to_string()),
            _ => FsError::Io(err),
        }
    }

    /// True for [`FsError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}
