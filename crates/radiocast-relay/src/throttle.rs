//! Rate-limiting pass-through stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::stage::Stage;
use crate::RelayResult;

/// Lowest pacing target accepted, so that every byte has a finite airtime.
const MIN_BITRATE_BPS: u32 = 8;

/// Handle used to end a throttle from outside the pipeline.
///
/// Cloning is cheap; all clones refer to the same throttle.
#[derive(Debug, Clone, Default)]
pub struct ThrottleHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug, Default)]
struct HandleInner {
    token: CancellationToken,
    ended: AtomicBool,
}

impl ThrottleHandle {
    /// Create a handle that has not ended.
    pub fn new() -> Self {
        Self::default()
    }

    /// End the throttle immediately.
    ///
    /// Any pending pacing delay is cut short and nothing further is
    /// emitted. Returns true only for the call that actually ended it;
    /// later calls are no-ops and return false.
    pub fn end(&self) -> bool {
        let first = !self.inner.ended.swap(true, Ordering::SeqCst);
        if first {
            self.inner.token.cancel();
            debug!("Throttle ended");
        }
        first
    }

    /// Check whether `end` has been called.
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// Wait until the throttle is ended.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

/// A pacing configuration, not yet connected to a downstream stage.
#[derive(Debug)]
pub struct Throttle {
    bytes_per_second: f64,
    slice_bytes: usize,
    handle: ThrottleHandle,
}

impl Throttle {
    /// Create a throttle for `bitrate_bps`, emitting one slice per `interval` of audio.
    pub fn create(bitrate_bps: u32, interval: Duration) -> Self {
        let bitrate_bps = bitrate_bps.max(MIN_BITRATE_BPS);
        let bytes_per_second = bitrate_bps as f64 / 8.0;
        let slice_bytes = ((bytes_per_second * interval.as_secs_f64()).round() as usize).max(1);

        debug!(bitrate_bps, slice_bytes, ?interval, "Creating throttle");

        Self {
            bytes_per_second,
            slice_bytes,
            handle: ThrottleHandle::new(),
        }
    }

    /// Get a handle that can end this throttle.
    pub fn handle(&self) -> ThrottleHandle {
        self.handle.clone()
    }

    /// Target output rate in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    /// Largest slice forwarded at once.
    pub fn slice_bytes(&self) -> usize {
        self.slice_bytes
    }

    /// Connect the throttle to the stage that receives paced output.
    pub fn connect<S: Stage>(self, downstream: S) -> ThrottledStage<S> {
        ThrottledStage {
            throttle: self,
            downstream,
            ready_at: None,
            finished: false,
        }
    }
}

/// A throttle connected to its downstream stage.
///
/// Each slice is held until its own airtime has elapsed after the
/// previous slice's, so `N` bytes are never out before `N / rate`
/// seconds of pacing. Idle time upstream earns no credit: after a stall
/// pacing restarts from the current instant instead of bursting.
pub struct ThrottledStage<S> {
    throttle: Throttle,
    downstream: S,
    ready_at: Option<Instant>,
    finished: bool,
}

impl<S> ThrottledStage<S> {
    /// Get a handle that can end this throttle.
    pub fn handle(&self) -> ThrottleHandle {
        self.throttle.handle()
    }

    fn airtime(&self, len: usize) -> Duration {
        Duration::from_secs_f64(len as f64 / self.throttle.bytes_per_second)
    }
}

#[async_trait]
impl<S: Stage> Stage for ThrottledStage<S> {
    async fn consume(&mut self, mut chunk: Bytes) -> RelayResult<()> {
        while !chunk.is_empty() {
            if self.throttle.handle.is_ended() {
                trace!(discarded = chunk.len(), "Throttle ended, discarding remainder");
                return Ok(());
            }

            let len = chunk.len().min(self.throttle.slice_bytes);
            let slice = chunk.split_to(len);

            let now = Instant::now();
            let base = match self.ready_at {
                Some(ready_at) if ready_at > now => ready_at,
                _ => now,
            };
            let due = base + self.airtime(len);

            tokio::select! {
                biased;
                _ = self.throttle.handle.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(due) => {}
            }

            self.downstream.consume(slice).await?;
            self.ready_at = Some(due);
        }

        Ok(())
    }

    async fn finish(&mut self) -> RelayResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.downstream.finish().await
    }

    async fn fail(&mut self, error: &RelayError) {
        self.downstream.fail(error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct RecordingStage {
        chunks: Arc<Mutex<Vec<(Instant, Bytes)>>>,
        finishes: Arc<Mutex<u32>>,
    }

    impl RecordingStage {
        fn lengths(&self) -> Vec<usize> {
            self.chunks.lock().iter().map(|(_, c)| c.len()).collect()
        }

        fn offsets_ms(&self, start: Instant) -> Vec<u128> {
            self.chunks
                .lock()
                .iter()
                .map(|(at, _)| at.duration_since(start).as_millis())
                .collect()
        }
    }

    #[async_trait]
    impl Stage for RecordingStage {
        async fn consume(&mut self, chunk: Bytes) -> RelayResult<()> {
            self.chunks.lock().push((Instant::now(), chunk));
            Ok(())
        }

        async fn finish(&mut self) -> RelayResult<()> {
            *self.finishes.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_slice_size_from_bitrate() {
        let throttle = Throttle::create(128_000, Duration::from_millis(100));
        assert_eq!(throttle.bytes_per_second(), 16_000.0);
        assert_eq!(throttle.slice_bytes(), 1_600);

        // Degenerate rates are clamped rather than dividing by zero.
        let throttle = Throttle::create(0, Duration::from_millis(100));
        assert_eq!(throttle.bytes_per_second(), 1.0);
        assert_eq!(throttle.slice_bytes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_output_to_bitrate() {
        let recorder = RecordingStage::default();
        // 8000 bps = 1000 bytes/s, 100 byte slices.
        let mut stage = Throttle::create(8_000, Duration::from_millis(100)).connect(recorder.clone());

        let start = Instant::now();
        stage.consume(Bytes::from(vec![7u8; 350])).await.unwrap();

        assert_eq!(recorder.lengths(), vec![100, 100, 100, 50]);
        let offsets = recorder.offsets_ms(start);
        for (offset, expected) in offsets.iter().zip([100u128, 200, 300, 350]) {
            assert!(*offset + 1 >= expected, "slice at {offset}ms before {expected}ms");
            assert!(*offset < expected + 5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_earns_no_burst() {
        let recorder = RecordingStage::default();
        let mut stage = Throttle::create(8_000, Duration::from_millis(100)).connect(recorder.clone());

        stage.consume(Bytes::from(vec![1u8; 100])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let resume = Instant::now();
        stage.consume(Bytes::from(vec![2u8; 300])).await.unwrap();

        let offsets: Vec<u128> = recorder.offsets_ms(resume).into_iter().skip(1).collect();
        assert_eq!(offsets.len(), 3);
        assert!(offsets[0] + 1 >= 100);
        assert!(offsets[1] + 1 >= 200);
        assert!(offsets[2] + 1 >= 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_stops_emission() {
        let recorder = RecordingStage::default();
        let stage = Throttle::create(8_000, Duration::from_millis(100)).connect(recorder.clone());
        let handle = stage.handle();

        let task = tokio::spawn(async move {
            let mut stage = stage;
            stage.consume(Bytes::from(vec![0u8; 1_000])).await.unwrap();
            stage
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(handle.end());
        assert!(!handle.end());
        assert!(handle.is_ended());

        let _stage = task.await.unwrap();
        assert_eq!(recorder.lengths(), vec![100, 100]);

        // Nothing more arrives after the end returned.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.lengths().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_before_any_bytes() {
        let recorder = RecordingStage::default();
        let mut stage = Throttle::create(8_000, Duration::from_millis(100)).connect(recorder.clone());

        assert!(stage.handle().end());
        stage.consume(Bytes::from_static(b"chunk1")).await.unwrap();
        assert!(recorder.lengths().is_empty());

        stage.finish().await.unwrap();
        stage.finish().await.unwrap();
        assert_eq!(*recorder.finishes.lock(), 1);
    }
}
