//! The capability shared by every pipeline stage.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RelayError;
use crate::RelayResult;

/// A stage that consumes chunks and is told when the stream ends or fails.
#[async_trait]
pub trait Stage: Send {
    /// Accept the next chunk of the stream.
    async fn consume(&mut self, chunk: Bytes) -> RelayResult<()>;

    /// The upstream has ended; no further chunks will arrive.
    async fn finish(&mut self) -> RelayResult<()>;

    /// The upstream failed. `finish` is still called afterwards.
    async fn fail(&mut self, error: &RelayError) {
        let _ = error;
    }
}

#[async_trait]
impl<S: Stage + ?Sized> Stage for Box<S> {
    async fn consume(&mut self, chunk: Bytes) -> RelayResult<()> {
        (**self).consume(chunk).await
    }

    async fn finish(&mut self) -> RelayResult<()> {
        (**self).finish().await
    }

    async fn fail(&mut self, error: &RelayError) {
        (**self).fail(error).await
    }
}
