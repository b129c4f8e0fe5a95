//! Common configuration and metrics types.

use serde::{Deserialize, Serialize};

use crate::DEFAULT_FALLBACK_BITRATE_BPS;

/// Configuration for the broadcast pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Executable used for bitrate probing (invoked as `<tool> --i -B <path>`).
    pub probe_tool: String,

    /// Upper bound on a single probe invocation, in milliseconds.
    pub probe_timeout_ms: u64,

    /// Bitrate assumed when probing fails (default: 128000).
    pub fallback_bitrate_bps: u32,

    /// Bytes read from the source per pipeline iteration.
    pub read_chunk_size: usize,

    /// Audio duration covered by one paced slice, in milliseconds.
    pub pacing_interval_ms: u64,

    /// Upper bound on a single listener write, in milliseconds.
    pub sink_write_timeout_ms: u64,

    /// Chunks buffered per listener before writes start waiting.
    pub client_buffer_chunks: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            probe_tool: "sox".to_string(),
            probe_timeout_ms: 5_000,
            fallback_bitrate_bps: DEFAULT_FALLBACK_BITRATE_BPS,
            read_chunk_size: 16 * 1024,
            pacing_interval_ms: 100,
            sink_write_timeout_ms: 2_000,
            client_buffer_chunks: 64,
        }
    }
}

/// Real-time broadcast metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMetrics {
    /// Currently registered listeners.
    pub listeners: usize,

    /// Chunks fanned out since the broadcast started.
    pub chunks_relayed: u64,

    /// Bytes fanned out since the broadcast started (counted once per chunk).
    pub bytes_relayed: u64,

    /// Listeners deregistered because their sink failed or ended.
    pub sinks_dropped: u64,

    /// Measured output bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Pacing target in kbps.
    pub target_bitrate_kbps: u32,

    /// Broadcast uptime in seconds.
    pub uptime_seconds: u64,
}
