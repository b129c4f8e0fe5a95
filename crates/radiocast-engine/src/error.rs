//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while starting a broadcast.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source file does not exist.
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The source exists but could not be opened.
    #[error("Failed to open source: {0}")]
    Source(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true if the source was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SourceNotFound(_))
    }
}
