//! Paced fan-out of one byte stream to many listeners.
//!
//! The relay is a chain of [`Stage`]s driven by a [`Pipeline`]:
//!
//! ```text
//! source (AsyncRead) ──► ThrottledStage ──► Multiplexer ──► { sink₁, sink₂, …, sinkₙ }
//!                              ▲                  │
//!                        ThrottleHandle     ClientRegistry
//! ```
//!
//! Listener failures never propagate past the [`Multiplexer`]: a sink
//! that errors, times out or has already ended is deregistered and the
//! chunk continues to every other listener.

mod error;
mod multiplexer;
mod pipeline;
mod registry;
mod sink;
mod stage;
mod throttle;

pub use error::{RelayError, SinkError};
pub use multiplexer::{CycleReport, Multiplexer, RelayStatistics};
pub use pipeline::{Pipeline, PipelineEnd, PipelineOutcome};
pub use registry::{ClientId, ClientRegistry};
pub use sink::{channel_sink, ChannelSink, ClientStream, Sink};
pub use stage::Stage;
pub use throttle::{Throttle, ThrottleHandle, ThrottledStage};

/// Chunks buffered per listener before writes to it start waiting.
pub const DEFAULT_CLIENT_BUFFER_CHUNKS: usize = 64;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Result type for sink writes.
pub type SinkResult<T> = Result<T, SinkError>;
