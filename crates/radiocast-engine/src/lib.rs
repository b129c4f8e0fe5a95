//! Broadcast session orchestration for radiocast.
//!
//! This crate ties the bitrate probe, the throttle and the multiplexer
//! together into a [`StreamingSession`] that can be started and stopped
//! while listeners come and go.

mod error;
mod metrics;
mod session;
mod state;

pub use error::EngineError;
pub use metrics::MetricsCollector;
pub use session::StreamingSession;

use std::time::Duration;

/// How often a running transfer reports metrics.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
