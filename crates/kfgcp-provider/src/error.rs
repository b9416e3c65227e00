//! Error type shared by every provider collaborator.

use kfgcp_core::ErrorKind;
use thiserror::Error;

/// A provider failure with its HTTP-style status code.
///
/// Collaborators translate their SDK errors into this type at the boundary so
/// that workflow code only ever looks at the code, never at SDK types. Code 0
/// stands for a transport failure with no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider error ({code}): {message}")]
pub struct ProviderError {
    pub code: u16,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == 404
    }

    /// Stale concurrency token or an object that already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self.code, 409 | 412)
    }

    /// Network failures, throttling and server errors.
    pub fn is_transient(&self) -> bool {
        self.code == 0 || self.code == 429 || self.code >= 500
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_not_found() {
            ErrorKind::NotFound
        } else if self.is_conflict() {
            ErrorKind::ConcurrencyConflict
        } else if self.is_transient() {
            ErrorKind::TransientProvider
        } else {
            ErrorKind::External
        }
    }
}
