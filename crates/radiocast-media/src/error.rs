//! Error types for the media module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while locating or opening media sources.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The requested file does not exist under the public root.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The request path tries to escape the public root.
    #[error("Path escapes public root: {0}")]
    OutsideRoot(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Returns true if the error means the source does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::OutsideRoot(_))
    }
}
