use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_upstream_resolver")]
    pub upstream_resolver: String,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_ms: u64,
    #[serde(default = "default_aggregate_timeout")]
    pub aggregate_timeout_ms: u64,
    /// One of none, error, info, verbose. RUST_LOG overrides when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_rbl_servers_file")]
    pub rbl_servers_file: String,
    /// Empty means no aggregate zones.
    #[serde(default)]
    pub aggregate_zones_file: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Absent disables the in-memory cache tier.
    #[serde(default)]
    pub memory_cache: Option<MemoryCacheConfig>,
    /// Empty disables per-query JSONL logging.
    #[serde(default)]
    pub query_log_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_memory_cache_entries")]
    pub max_entries: usize,
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    8053
}
fn default_upstream_resolver() -> String {
    "8.8.8.8:53".to_string()
}
fn default_upstream_timeout() -> u64 {
    5000
}
fn default_aggregate_timeout() -> u64 {
    250
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_rbl_servers_file() -> String {
    "rbl-servers.json".to_string()
}
fn default_database_path() -> String {
    "rblgate.db".to_string()
}
fn default_memory_cache_entries() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default config deserializes")
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Map the configured log level onto a tracing EnvFilter directive.
    pub fn env_filter(&self) -> &'static str {
        match self.log_level.as_str() {
            "none" => "off",
            "error" => "error",
            "verbose" => "debug",
            _ => "info",
        }
    }

    /// Listen address with IPv6 hosts bracketed.
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }
}
