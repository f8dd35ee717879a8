//! Shared, file-backed configuration. Mirrors the teacher's `config::Config`
//! shape: a TOML file is loaded once at process start, and CLI flags (parsed
//! per binary) layer on top for the values that are naturally per-process
//! (addresses, data dirs).

use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Chunk size in bytes. Only the final chunk of a file may be shorter.
    pub chunk_size: usize,
    /// Number of replicas per chunk (R).
    pub replication_factor: usize,
    /// Storage-node heartbeat interval, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Window after which a node with no heartbeat is considered dead.
    pub liveness_ttl_secs: u64,
    /// Timeout for a single `/raft/propose` call, in seconds.
    pub propose_timeout_secs: u64,
    /// Log level passed to `tracing_subscriber::EnvFilter` when `RUST_LOG` unset.
    pub log_level: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2 * 1024 * 1024,
            replication_factor: 3,
            heartbeat_interval_secs: 5,
            liveness_ttl_secs: 30,
            propose_timeout_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub common: CommonConfig,
}

/// Load `config.toml` if present; fall back to defaults otherwise so a
/// binary can run from bare CLI flags without operator setup.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_base_design_constants() {
        let cfg = CommonConfig::default();
        assert_eq!(cfg.chunk_size, 2 * 1024 * 1024);
        assert_eq!(cfg.replication_factor, 3);
        assert_eq!(cfg.liveness_ttl_secs, 30);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(cfg.common.replication_factor, 3);
    }
}
