//! strato.toml configuration parser.
//!
//! The daemon reads one TOML file at startup. A missing file is seeded
//! with the defaults below so a bare `stratod` run works out of the box.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG: &str = r#"wasm_server_addr = "127.0.0.1:5000"
api_server_addr = "127.0.0.1:3000"
storage_driver = "memory"
request_timeout_secs = 30
max_body_bytes = 4194304

[cluster]
member_addr = "127.0.0.1:6666"
id = "wasm_member_1"
region = "eu-west"

[limits]
memory_bytes = 67108864
fuel = 500000000
max_open_files = 10
max_open_dirs = 10
mount_dir = "/"
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Front-door bind address.
    #[serde(default = "default_wasm_server_addr")]
    pub wasm_server_addr: String,

    /// Management API bind address. Consumed by the API server, not the
    /// core; carried here so one file configures both binaries.
    #[serde(default = "default_api_server_addr")]
    pub api_server_addr: String,

    #[serde(default = "default_storage_driver")]
    pub storage_driver: String,

    /// Path to the SpiderMonkey interpreter WASM used by `js` apps.
    /// When unset, `js` invocations fail with an interpreter error.
    #[serde(default)]
    pub js_interpreter: Option<PathBuf>,

    /// How long the front door waits for a runtime response.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest accepted request body; larger bodies get a 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub member_addr: String,
    pub id: String,
    pub region: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            member_addr: "127.0.0.1:6666".to_string(),
            id: "wasm_member_1".to_string(),
            region: "eu-west".to_string(),
        }
    }
}

/// Per-invocation sandbox budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub memory_bytes: usize,
    pub fuel: u64,
    pub max_open_files: u32,
    pub max_open_dirs: u32,
    pub mount_dir: PathBuf,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory_bytes: 64 * 1024 * 1024,
            fuel: 500_000_000,
            max_open_files: 10,
            max_open_dirs: 10,
            mount_dir: PathBuf::from("/"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config must parse")
    }
}

impl Config {
    /// Load the config from `path`, seeding the file with defaults when it
    /// does not exist yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            std::fs::write(path, DEFAULT_CONFIG)?;
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_wasm_server_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_api_server_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_storage_driver() -> String {
    "memory".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = Config::default();
        assert_eq!(config.wasm_server_addr, "127.0.0.1:5000");
        assert_eq!(config.storage_driver, "memory");
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.limits.max_open_files, 10);
        assert!(config.js_interpreter.is_none());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
wasm_server_addr = "0.0.0.0:8080"

[cluster]
member_addr = "10.0.0.1:6666"
id = "member_2"
region = "us-east"
"#,
        )
        .unwrap();
        assert_eq!(config.wasm_server_addr, "0.0.0.0:8080");
        assert_eq!(config.cluster.region, "us-east");
        // Untouched sections keep their defaults.
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.limits.memory_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn load_seeds_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strato.toml");

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.storage_driver, "memory");

        // A second load reads the seeded file.
        let again = Config::load(&path).unwrap();
        assert_eq!(again.wasm_server_addr, config.wasm_server_addr);
    }
}
