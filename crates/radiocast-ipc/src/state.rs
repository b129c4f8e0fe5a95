//! Session state machine types.

use serde::{Deserialize, Serialize};

/// The current state of a streaming session.
///
/// Transitions follow `Idle → Probing → Streaming → Stopped`. A stopped
/// session may be started again, which re-enters `Probing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No broadcast has been started yet.
    #[default]
    Idle,

    /// Inspecting the source for its bitrate.
    Probing {
        /// Source being probed.
        source: String,
    },

    /// Relaying the source to listeners.
    Streaming {
        /// Source being relayed.
        source: String,

        /// Pacing target in bits per second.
        bitrate_bps: u32,
    },

    /// The last broadcast has ended.
    Stopped {
        /// Why the broadcast ended.
        reason: StopReason,
    },
}

impl SessionState {
    /// Returns true if no broadcast was ever started.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while the source is being probed.
    pub fn is_probing(&self) -> bool {
        matches!(self, Self::Probing { .. })
    }

    /// Returns true while bytes are being relayed.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Returns true once a broadcast has ended.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Probing { .. } => "Probing",
            Self::Streaming { .. } => "Streaming",
            Self::Stopped { .. } => "Stopped",
        }
    }
}

/// Reason a broadcast ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// `stop` was requested.
    UserRequested,

    /// The source reached end of stream.
    SourceExhausted,

    /// The source could not be opened or read.
    SourceFailed { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Broadcast stopped by request".to_string(),
            Self::SourceExhausted => "Source reached end of stream".to_string(),
            Self::SourceFailed { message } => format!("Source failed: {message}"),
        }
    }
}
