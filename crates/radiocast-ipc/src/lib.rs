//! Shared session state, events and configuration for radiocast.
//!
//! This crate defines the types exchanged between the streaming engine
//! and whatever surface drives it (the HTTP server, tests, tooling).

mod events;
mod state;
mod types;

pub use events::SessionEvent;
pub use state::{SessionState, StopReason};
pub use types::{BroadcastConfig, BroadcastMetrics};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (Engine → observers).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default bitrate used when probing a source yields nothing usable.
pub const DEFAULT_FALLBACK_BITRATE_BPS: u32 = 128_000;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
