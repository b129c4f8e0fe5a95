//! Metrics collection and reporting.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use radiocast_ipc::BroadcastMetrics;
use radiocast_relay::RelayStatistics;

/// Collects broadcast metrics for the current transfer.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    target_bitrate_kbps: RwLock<u32>,
    statistics: RwLock<Arc<RelayStatistics>>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            target_bitrate_kbps: RwLock::new(0),
            statistics: RwLock::new(Arc::new(RelayStatistics::default())),
        }
    }

    /// Start collecting for a transfer paced at `target_bitrate_bps`.
    ///
    /// Returns the fresh statistics block the transfer's multiplexer
    /// should record into.
    pub fn start(&self, target_bitrate_bps: u32) -> Arc<RelayStatistics> {
        let statistics = Arc::new(RelayStatistics::default());

        *self.statistics.write() = Arc::clone(&statistics);
        *self.target_bitrate_kbps.write() = target_bitrate_bps / 1000;
        *self.start_time.write() = Some(Instant::now());

        debug!(target_bitrate_bps, "Metrics started");
        statistics
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.start_time.read().is_some()
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self, listeners: usize) -> BroadcastMetrics {
        let now = Instant::now();
        let statistics = Arc::clone(&self.statistics.read());
        let bytes = statistics.bytes();

        // Calculate bitrate
        let bitrate_kbps = if let Some(start) = *self.start_time.read() {
            let elapsed = now.duration_since(start).as_secs_f64();
            if elapsed > 0.0 {
                (bytes as f64 * 8.0 / elapsed / 1000.0) as u32
            } else {
                0
            }
        } else {
            0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        BroadcastMetrics {
            listeners,
            chunks_relayed: statistics.chunks(),
            bytes_relayed: bytes,
            sinks_dropped: statistics.sinks_dropped(),
            bitrate_kbps,
            target_bitrate_kbps: *self.target_bitrate_kbps.read(),
            uptime_seconds,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
