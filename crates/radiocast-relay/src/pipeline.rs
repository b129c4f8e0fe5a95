//! Drives a byte source through a chain of stages.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument, warn};

use crate::error::RelayError;
use crate::stage::Stage;
use crate::throttle::ThrottleHandle;

/// Why a pipeline stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEnd {
    /// The source reached end of file.
    Exhausted,

    /// The throttle handle was ended.
    Ended,

    /// The source or a stage failed.
    Failed(String),
}

/// Result of running a pipeline to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Why the pipeline stopped.
    pub end: PipelineEnd,

    /// Bytes read from the source.
    pub bytes_read: u64,
}

/// Reads a source in chunks and pushes each chunk into a stage.
pub struct Pipeline<R, S> {
    source: R,
    stage: S,
    chunk_size: usize,
    handle: ThrottleHandle,
}

impl<R, S> Pipeline<R, S>
where
    R: AsyncRead + Unpin + Send,
    S: Stage,
{
    /// Create a new pipeline. `handle` ends the pipeline between reads.
    pub fn new(source: R, stage: S, chunk_size: usize, handle: ThrottleHandle) -> Self {
        Self {
            source,
            stage,
            chunk_size: chunk_size.max(1),
            handle,
        }
    }

    /// Run until the source is exhausted, the handle is ended, or something fails.
    ///
    /// The stage's `finish` is always called exactly once before this returns.
    #[instrument(name = "pipeline", skip(self), fields(chunk_size = self.chunk_size))]
    pub async fn run(mut self) -> PipelineOutcome {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut bytes_read = 0u64;

        let end = loop {
            if self.handle.is_ended() {
                break PipelineEnd::Ended;
            }

            let read = tokio::select! {
                biased;
                _ = self.handle.cancelled() => break PipelineEnd::Ended,
                read = self.source.read(&mut buffer) => read,
            };

            let n = match read {
                Ok(0) => break PipelineEnd::Exhausted,
                Ok(n) => n,
                Err(e) => {
                    let error = RelayError::Source(e);
                    warn!("Source read failed: {}", error);
                    self.stage.fail(&error).await;
                    break PipelineEnd::Failed(error.to_string());
                }
            };

            bytes_read += n as u64;

            if let Err(e) = self.stage.consume(Bytes::copy_from_slice(&buffer[..n])).await {
                warn!("Stage rejected chunk: {}", e);
                self.stage.fail(&e).await;
                break PipelineEnd::Failed(e.to_string());
            }
        };

        if let Err(e) = self.stage.finish().await {
            warn!("Failed to finish stage: {}", e);
        }

        match &end {
            PipelineEnd::Failed(_) => debug!(bytes_read, "Pipeline stopped after failure"),
            _ => info!(bytes_read, end = ?end, "Pipeline stopped"),
        }

        PipelineOutcome { end, bytes_read }
    }
}
