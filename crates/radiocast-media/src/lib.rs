//! Bitrate probing and source file access.
//!
//! This crate wraps the two external collaborators of the broadcast
//! engine: the command-line tool that reports a file's bitrate, and the
//! public directory that sources and static files are served from.

mod error;
mod files;
mod probe;

pub use error::MediaError;
pub use files::{content_type_for, FileInfo, FileService};
pub use probe::{parse_bitrate_token, Bitrate, BitrateOrigin, BitrateProbe, CommandProbe, ProbeOutput};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Arguments passed to the probe tool ahead of the source path.
pub const PROBE_ARGS: [&str; 2] = ["--i", "-B"];
