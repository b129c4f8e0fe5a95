//! Error types for the relay module.

use std::time::Duration;

use thiserror::Error;

/// Errors a listener sink can report for a single write.
///
/// Every variant is an ordinary, expected event: the multiplexer
/// resolves all of them the same way, by deregistering the listener.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The consumer side of the sink is gone.
    #[error("Sink closed")]
    Closed,

    /// The sink signalled completion before the write.
    #[error("Sink already ended")]
    Ended,

    /// The write did not complete in time.
    #[error("Sink write timed out after {0:?}")]
    TimedOut(Duration),

    /// Transport-specific write failure.
    #[error("Sink write failed: {0}")]
    Write(String),
}

/// Errors that can occur while moving bytes through the pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Reading the source failed.
    #[error("Source read failed: {0}")]
    Source(#[from] std::io::Error),

    /// A stage rejected a chunk.
    #[error("Stage error: {0}")]
    Stage(String),
}
