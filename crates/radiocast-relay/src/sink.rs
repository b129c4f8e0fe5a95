//! Listener sinks.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::SinkResult;

/// A write-only byte endpoint representing one listener.
///
/// Writes report failure through their result instead of panicking, so
/// the multiplexer can branch on it per listener.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write one chunk to the listener.
    async fn write(&self, chunk: Bytes) -> SinkResult<()>;

    /// Check whether the listener has independently ended the connection.
    fn is_ended(&self) -> bool;
}

/// Create a bounded sink/stream pair holding up to `capacity` chunks.
pub fn channel_sink(capacity: usize) -> (ChannelSink, ClientStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, ClientStream { rx })
}

/// Producer half of a listener channel, held by the registry.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl Sink for ChannelSink {
    async fn write(&self, chunk: Bytes) -> SinkResult<()> {
        self.tx.send(chunk).await.map_err(|_| SinkError::Closed)
    }

    fn is_ended(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of a listener channel, handed to the transport.
///
/// Dropping or closing it ends the sink; the multiplexer deregisters
/// the listener on its next chunk.
#[derive(Debug)]
pub struct ClientStream {
    rx: mpsc::Receiver<Bytes>,
}

impl ClientStream {
    /// Receive the next chunk, or `None` once the sink is gone and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive a chunk that is already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Signal that this listener will not read any more.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for ClientStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.rx.poll_recv(cx)
    }
}
