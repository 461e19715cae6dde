use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::module::Platform;

// =============================================================================
// Time-related constants
// =============================================================================

/// How often the refresh loop looks for a stale module, in milliseconds (1 minute)
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 60 * 1000;

/// Age after which a module is refreshed, in milliseconds (24 hours)
pub const DEFAULT_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1000;

/// Upper bound on one background fetch, in milliseconds (5 minutes)
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// How long a request waits for a fetch before answering 202, in milliseconds
pub const DEFAULT_REQUEST_DEADLINE_MS: u64 = 3_000;

// =============================================================================
// Limits
// =============================================================================

/// Fetches allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 30;

/// Search results returned when the request sets no limit
pub const DEFAULT_SEARCH_LIMIT: usize = 25;

/// Import graph depth when the request sets none
pub const DEFAULT_GRAPH_DEPTH: usize = 2;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid default platform: {0}")]
    Platform(String),
}

/// Server configuration, read from an optional JSON file and overridden by
/// command-line flags.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// `goos/goarch` used when a request names no platform
    pub default_platform: String,
    /// Fetch timeout in milliseconds
    pub fetch_timeout: u64,
    /// Request deadline in milliseconds
    pub request_deadline: u64,
    /// Module proxy URL; unset serves local directories, the module cache and GOROOT
    pub proxy_url: Option<String>,
    /// Refresh loop interval in milliseconds
    pub refresh_interval: u64,
    /// Module age that triggers a refresh, in milliseconds
    pub max_age: u64,
    pub max_concurrent_fetches: usize,
    /// SQLite database; unset runs without a store
    pub database: Option<PathBuf>,
    pub listen: String,
    pub log_file: Option<PathBuf>,
    pub sources: SourcesConfig,
}

/// Where module contents come from
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SourcesConfig {
    /// Git checkout of the Go repository, used for the standard library with a proxy
    pub go_repo: Option<PathBuf>,
    /// Module directories served as-is, without a proxy
    pub local_dirs: Vec<PathBuf>,
    /// Module download cache; defaults to GOMODCACHE or GOPATH/pkg/mod
    pub mod_cache: Option<PathBuf>,
    /// Go installation serving the standard library without a proxy; defaults to GOROOT
    pub goroot: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_platform: Platform::default().to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT_MS,
            request_deadline: DEFAULT_REQUEST_DEADLINE_MS,
            proxy_url: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL_MS,
            max_age: DEFAULT_MAX_AGE_MS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            database: None,
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            log_file: None,
            sources: SourcesConfig::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn platform(&self) -> Result<Platform, ConfigError> {
        self.default_platform
            .parse()
            .map_err(|_| ConfigError::Platform(self.default_platform.clone()))
    }
}

/// Returns the path to the data directory for godocs.
/// Uses $XDG_DATA_HOME/godocs if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/godocs,
/// or ./godocs if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the database path used when none is configured.
pub fn db_path() -> PathBuf {
    data_dir().join("godocs.db")
}

/// Returns the Go repository checkout used when none is configured.
pub fn go_repo_path() -> PathBuf {
    data_dir().join("go")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("godocs")
}
