use crate::error::ServerResult;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for the engine and its bundled transport.
///
/// Every field has a default, so a JSON document only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory static files are served from.
    pub wwwroot: PathBuf,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_connections: usize,
    /// How long an idle keep-alive connection is held open.
    pub keep_alive_secs: u64,
    /// Largest request body accepted by the transport, in bytes.
    pub max_body_size: usize,
    /// flate2 level, 0 to 9.
    pub compression_level: u32,
    /// Where uploaded files are stored; the system temp dir when unset.
    pub upload_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            wwwroot: PathBuf::from("wwwroot"),
            session_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
            max_connections: 256,
            keep_alive_secs: 5,
            max_body_size: 32 * 1024 * 1024,
            compression_level: 6,
            upload_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> ServerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // a zero period would make tokio's interval panic
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
