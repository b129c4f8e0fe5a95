//! Events sent from the engine to observers.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::BroadcastMetrics;

/// Events that the engine can send to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// A listener was registered.
    ListenerJoined {
        /// Identifier of the new listener.
        client_id: String,

        /// Listener count after the join.
        listeners: usize,
    },

    /// A listener was deregistered.
    ListenerLeft {
        /// Identifier of the departed listener.
        client_id: String,

        /// Listener count after the departure.
        listeners: usize,
    },

    /// Probing failed and the fallback bitrate is in use.
    BitrateFallback {
        /// Source that was probed.
        source: String,

        /// Why the probe result was rejected.
        reason: String,
    },

    /// Updated broadcast metrics.
    Metrics(BroadcastMetrics),
}
