//! Fan-out of each chunk to every registered listener.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info, trace, warn};

use crate::error::{RelayError, SinkError};
use crate::registry::{ClientId, ClientRegistry};
use crate::sink::Sink;
use crate::stage::Stage;
use crate::{RelayResult, SinkResult};

/// Relay statistics shared with whoever reports metrics.
#[derive(Debug, Default)]
pub struct RelayStatistics {
    chunks: AtomicU64,
    bytes: AtomicU64,
    deliveries: AtomicU64,
    sinks_dropped: AtomicU64,
}

impl RelayStatistics {
    /// Chunks fanned out.
    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    /// Bytes fanned out, counted once per chunk.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Successful per-listener writes.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Listeners deregistered after a failed or ended sink.
    pub fn sinks_dropped(&self) -> u64 {
        self.sinks_dropped.load(Ordering::Relaxed)
    }
}

/// Outcome of fanning out one chunk.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Listeners that received the chunk.
    pub delivered: usize,

    /// Listeners deregistered during this cycle.
    pub dropped: Vec<ClientId>,
}

/// Copies every chunk to every listener currently in the registry.
///
/// A sink whose write fails, times out, or that has already ended is an
/// ordinary event here: the listener is removed from the registry and
/// the remaining listeners still receive the chunk. Nothing a listener
/// does can make the multiplexer itself fail.
pub struct Multiplexer {
    registry: Arc<ClientRegistry>,
    write_timeout: Duration,
    statistics: Arc<RelayStatistics>,
}

impl Multiplexer {
    /// Create a multiplexer over `registry`, bounding each listener write by `write_timeout`.
    pub fn new(registry: Arc<ClientRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
            statistics: Arc::new(RelayStatistics::default()),
        }
    }

    /// Record into an existing statistics block.
    pub fn with_statistics(mut self, statistics: Arc<RelayStatistics>) -> Self {
        self.statistics = statistics;
        self
    }

    /// Get the statistics block.
    pub fn statistics(&self) -> Arc<RelayStatistics> {
        Arc::clone(&self.statistics)
    }

    /// Offer `chunk` to every registered listener.
    ///
    /// All writes for the chunk complete (or are abandoned) before this
    /// returns, so listeners see chunks in source order.
    pub async fn broadcast(&self, chunk: Bytes) -> CycleReport {
        let listeners = self.registry.snapshot();
        let timeout = self.write_timeout;

        let writes = listeners.into_iter().map(|(id, sink)| {
            let chunk = chunk.clone();
            async move { (id, deliver(sink.as_ref(), chunk, timeout).await) }
        });

        let mut report = CycleReport::default();

        for (id, result) in join_all(writes).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(client_id = %id, error = %e, "Dropping listener");
                    self.registry.remove(&id);
                    report.dropped.push(id);
                }
            }
        }

        self.statistics.chunks.fetch_add(1, Ordering::Relaxed);
        self.statistics
            .bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.statistics
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.statistics
            .sinks_dropped
            .fetch_add(report.dropped.len() as u64, Ordering::Relaxed);

        trace!(
            bytes = chunk.len(),
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "Chunk fanned out"
        );

        report
    }
}

async fn deliver(sink: &dyn Sink, chunk: Bytes, timeout: Duration) -> SinkResult<()> {
    if sink.is_ended() {
        return Err(SinkError::Ended);
    }

    match tokio::time::timeout(timeout, sink.write(chunk)).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::TimedOut(timeout)),
    }
}

#[async_trait]
impl Stage for Multiplexer {
    async fn consume(&mut self, chunk: Bytes) -> RelayResult<()> {
        self.broadcast(chunk).await;
        Ok(())
    }

    async fn finish(&mut self) -> RelayResult<()> {
        // Listeners stay registered for the next broadcast.
        info!(
            listeners = self.registry.len(),
            chunks = self.statistics.chunks(),
            "Upstream ended"
        );
        Ok(())
    }

    async fn fail(&mut self, error: &RelayError) {
        warn!("Upstream failed: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;

    use parking_lot::Mutex;

    /// Sink double that records writes and can be told to fail.
    #[derive(Default)]
    struct TestSink {
        received: Mutex<Vec<Bytes>>,
        ended: AtomicBool,
        fail_writes: bool,
        hang: bool,
    }

    impl TestSink {
        fn failing() -> Self {
            Self {
                fail_writes: true,
                ..Default::default()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Default::default()
            }
        }

        fn received(&self) -> Vec<Bytes> {
            self.received.lock().clone()
        }
    }

    #[async_trait]
    impl Sink for TestSink {
        async fn write(&self, chunk: Bytes) -> SinkResult<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_writes {
                return Err(SinkError::Write("connection reset".to_string()));
            }
            self.received.lock().push(chunk);
            Ok(())
        }

        fn is_ended(&self) -> bool {
            self.ended.load(Ordering::SeqCst)
        }
    }

    fn multiplexer(registry: &Arc<ClientRegistry>) -> Multiplexer {
        Multiplexer::new(Arc::clone(registry), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_every_listener_receives_chunk() {
        let registry = Arc::new(ClientRegistry::default());
        let sinks: Vec<Arc<TestSink>> = (0..3).map(|_| Arc::new(TestSink::default())).collect();
        for sink in &sinks {
            registry.insert(Arc::clone(sink) as Arc<dyn Sink>);
        }

        let mux = multiplexer(&registry);
        let report = mux.broadcast(Bytes::from_static(b"X")).await;

        assert_eq!(report.delivered, 3);
        assert!(report.dropped.is_empty());
        for sink in &sinks {
            assert_eq!(sink.received(), vec![Bytes::from_static(b"X")]);
        }
    }

    #[tokio::test]
    async fn test_ended_sink_is_removed_others_still_served() {
        let registry = Arc::new(ClientRegistry::default());
        let a = Arc::new(TestSink::default());
        let b = Arc::new(TestSink::default());
        let c = Arc::new(TestSink::default());

        registry.insert(Arc::clone(&a) as Arc<dyn Sink>);
        let b_id = registry.insert(Arc::clone(&b) as Arc<dyn Sink>);
        registry.insert(Arc::clone(&c) as Arc<dyn Sink>);

        b.ended.store(true, Ordering::SeqCst);

        let mux = multiplexer(&registry);
        let report = mux.broadcast(Bytes::from_static(b"X")).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, vec![b_id]);
        assert_eq!(a.received(), vec![Bytes::from_static(b"X")]);
        assert_eq!(c.received(), vec![Bytes::from_static(b"X")]);
        assert!(b.received().is_empty());
        assert!(!registry.contains(&b_id));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_is_removed() {
        let registry = Arc::new(ClientRegistry::default());
        let good = Arc::new(TestSink::default());
        registry.insert(Arc::clone(&good) as Arc<dyn Sink>);
        let bad_id = registry.insert(Arc::new(TestSink::failing()));

        let mux = multiplexer(&registry);
        mux.broadcast(Bytes::from_static(b"chunk1")).await;
        mux.broadcast(Bytes::from_static(b"chunk2")).await;

        assert!(!registry.contains(&bad_id));
        assert_eq!(
            good.received(),
            vec![Bytes::from_static(b"chunk1"), Bytes::from_static(b"chunk2")]
        );

        let stats = mux.statistics();
        assert_eq!(stats.chunks(), 2);
        assert_eq!(stats.bytes(), 12);
        assert_eq!(stats.deliveries(), 2);
        assert_eq!(stats.sinks_dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_sink_times_out() {
        let registry = Arc::new(ClientRegistry::default());
        let good = Arc::new(TestSink::default());
        registry.insert(Arc::clone(&good) as Arc<dyn Sink>);
        let slow_id = registry.insert(Arc::new(TestSink::hanging()));

        let mux = Multiplexer::new(Arc::clone(&registry), Duration::from_millis(500));
        let report = mux.broadcast(Bytes::from_static(b"X")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, vec![slow_id]);
        assert_eq!(good.received(), vec![Bytes::from_static(b"X")]);
    }

    #[tokio::test]
    async fn test_disconnected_channel_listener_is_removed() {
        let registry = Arc::new(ClientRegistry::default());
        let (kept, mut kept_stream) = registry.add();
        let (gone, gone_stream) = registry.add();
        drop(gone_stream);

        let mux = multiplexer(&registry);
        mux.broadcast(Bytes::from_static(b"X")).await;

        assert!(registry.contains(&kept));
        assert!(!registry.contains(&gone));
        assert_eq!(kept_stream.recv().await.unwrap(), Bytes::from_static(b"X"));
    }

    #[tokio::test]
    async fn test_finish_leaves_listeners_open() {
        let registry = Arc::new(ClientRegistry::default());
        let (id, mut stream) = registry.add();

        let mut mux = multiplexer(&registry);
        mux.consume(Bytes::from_static(b"last")).await.unwrap();
        mux.finish().await.unwrap();

        assert!(registry.contains(&id));
        assert_eq!(stream.recv().await.unwrap(), Bytes::from_static(b"last"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_is_fine() {
        let registry = Arc::new(ClientRegistry::default());
        let report = multiplexer(&registry).broadcast(Bytes::from_static(b"X")).await;
        assert_eq!(report.delivered, 0);
        assert!(report.dropped.is_empty());
    }
}
