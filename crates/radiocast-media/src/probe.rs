//! Bitrate probing through an external analysis tool.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::PROBE_ARGS;

/// Where a bitrate value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateOrigin {
    /// Parsed from the probe tool's output.
    Probed,

    /// The configured fallback, because probing yielded nothing usable.
    Fallback,
}

/// A source bitrate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrate {
    bits_per_second: u32,
    origin: BitrateOrigin,
}

impl Bitrate {
    /// A bitrate reported by the probe.
    pub fn probed(bits_per_second: u32) -> Self {
        Self {
            bits_per_second,
            origin: BitrateOrigin::Probed,
        }
    }

    /// The fallback bitrate.
    pub fn fallback(bits_per_second: u32) -> Self {
        Self {
            bits_per_second,
            origin: BitrateOrigin::Fallback,
        }
    }

    /// Bits per second.
    pub fn bits_per_second(&self) -> u32 {
        self.bits_per_second
    }

    /// Bytes per second, as used for pacing.
    pub fn bytes_per_second(&self) -> f64 {
        self.bits_per_second as f64 / 8.0
    }

    /// Where this value came from.
    pub fn origin(&self) -> BitrateOrigin {
        self.origin
    }

    /// Returns true if this is the fallback value.
    pub fn is_fallback(&self) -> bool {
        self.origin == BitrateOrigin::Fallback
    }
}

/// Trait for bitrate probes.
///
/// Probing never fails from the caller's point of view: every failure
/// resolves to the fallback bitrate so that a broadcast can still start.
#[async_trait]
pub trait BitrateProbe: Send + Sync {
    /// Determine the bitrate of the file at `path`.
    async fn probe(&self, path: &Path) -> Bitrate;

    /// Get probe name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Captured output of one probe invocation.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,

    /// Standard error, lossily decoded.
    pub stderr: String,

    /// Whether the process exited successfully.
    pub success: bool,
}

impl ProbeOutput {
    /// Build from a finished process.
    pub fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        }
    }

    /// Extract the bitrate, or the reason the output is unusable.
    pub fn bitrate_bps(&self) -> Result<u32, String> {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return Err(format!("probe reported an error: {stderr}"));
        }

        let token = self
            .stdout
            .split_whitespace()
            .next()
            .ok_or_else(|| "probe produced no output".to_string())?;

        if !self.success {
            return Err("probe exited abnormally".to_string());
        }

        parse_bitrate_token(token).ok_or_else(|| format!("unrecognized bitrate token {token:?}"))
    }

    /// Resolve to a bitrate, substituting `fallback_bps` on any failure.
    pub fn resolve(&self, fallback_bps: u32) -> Bitrate {
        match self.bitrate_bps() {
            Ok(bps) => Bitrate::probed(bps),
            Err(reason) => {
                warn!(%reason, fallback_bps, "Using fallback bitrate");
                Bitrate::fallback(fallback_bps)
            }
        }
    }
}

/// Parse a probe token such as `128k`, `1.41M` or `96000` into bits per second.
///
/// Returns `None` for anything that is not a positive number with an
/// optional `k`/`K` (thousands) or `M`/`m` (millions) suffix.
pub fn parse_bitrate_token(token: &str) -> Option<u32> {
    let token = token.trim();
    let (number, multiplier) = match token.chars().last()? {
        'k' | 'K' => (&token[..token.len() - 1], 1_000.0),
        'M' | 'm' => (&token[..token.len() - 1], 1_000_000.0),
        _ => (token, 1.0),
    };

    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let value: f64 = number.parse().ok()?;
    let bps = (value * multiplier).round();

    if bps < 1.0 || bps > u32::MAX as f64 {
        return None;
    }

    Some(bps as u32)
}

/// Probe that shells out to `<tool> --i -B <path>`.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    tool: PathBuf,
    timeout: Duration,
    fallback_bps: u32,
}

impl CommandProbe {
    /// Create a new command probe.
    pub fn new(tool: impl Into<PathBuf>, timeout: Duration, fallback_bps: u32) -> Self {
        Self {
            tool: tool.into(),
            timeout,
            fallback_bps,
        }
    }

    async fn run(&self, path: &Path) -> Result<ProbeOutput, String> {
        let child = Command::new(&self.tool)
            .args(PROBE_ARGS)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(ProbeOutput::from_output(&output)),
            Ok(Err(e)) => Err(format!("failed to run {}: {}", self.tool.display(), e)),
            Err(_) => Err(format!("probe timed out after {:?}", self.timeout)),
        }
    }
}

#[async_trait]
impl BitrateProbe for CommandProbe {
    #[instrument(name = "probe_bitrate", skip(self), fields(tool = %self.tool.display()))]
    async fn probe(&self, path: &Path) -> Bitrate {
        match self.run(path).await {
            Ok(output) => {
                let bitrate = output.resolve(self.fallback_bps);
                debug!(
                    bits_per_second = bitrate.bits_per_second(),
                    origin = ?bitrate.origin(),
                    "Probe finished"
                );
                bitrate
            }
            Err(reason) => {
                warn!(%reason, fallback_bps = self.fallback_bps, "Using fallback bitrate");
                Bitrate::fallback(self.fallback_bps)
            }
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
