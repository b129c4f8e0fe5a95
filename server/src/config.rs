//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use radiocast_ipc::BroadcastConfig;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "RADIOCAST_CONFIG";

/// Environment variable overriding the bind address.
pub const BIND_ENV: &str = "RADIOCAST_BIND";

/// Environment variable overriding the public root.
pub const PUBLIC_ROOT_ENV: &str = "RADIOCAST_PUBLIC_ROOT";

/// Configuration for the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind: SocketAddr,

    /// Directory that sources and static files are served from.
    pub public_root: PathBuf,

    /// Source to start broadcasting as soon as the server is up.
    pub autostart: Option<PathBuf>,

    /// Engine settings.
    pub broadcast: BroadcastConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            public_root: PathBuf::from("public"),
            autostart: None,
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration, reading variables through `var`.
    pub fn load_with(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = match var(CONFIG_ENV) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {path}"))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config file {path}"))?
            }
            None => Self::default(),
        };

        if let Some(bind) = var(BIND_ENV) {
            config.bind = bind
                .parse()
                .with_context(|| format!("Invalid {BIND_ENV} value {bind:?}"))?;
        }

        if let Some(root) = var(PUBLIC_ROOT_ENV) {
            config.public_root = PathBuf::from(root);
        }

        debug!(?config, "Configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn vars(pairs: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = ServerConfig::load_with(|_| None).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind.port(), 8000);
        assert_eq!(config.public_root, PathBuf::from("public"));
        assert_eq!(config.broadcast.fallback_bitrate_bps, 128_000);
    }

    #[test]
    fn test_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radiocast.json");
        std::fs::write(
            &path,
            r#"{ "autostart": "music.mp3", "broadcast": { "probe_tool": "soxi" } }"#,
        )
        .unwrap();

        let config = ServerConfig::load_with(vars(&[
            (CONFIG_ENV, path.display().to_string()),
            (BIND_ENV, "127.0.0.1:9000".to_string()),
            (PUBLIC_ROOT_ENV, "/srv/radio".to_string()),
        ]))
        .unwrap();

        assert_eq!(config.autostart, Some(PathBuf::from("music.mp3")));
        assert_eq!(config.broadcast.probe_tool, "soxi");
        assert_eq!(config.broadcast.pacing_interval_ms, 100);
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.public_root, PathBuf::from("/srv/radio"));
    }

    #[test]
    fn test_invalid_bind_is_an_error() {
        let result = ServerConfig::load_with(vars(&[(BIND_ENV, "not an address".to_string())]));
        assert!(result.is_err());
    }
}
