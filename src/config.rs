//! Runtime configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `KG_*` environment variables (e.g. `KG_STORE_URL`, `KG_NAMESPACE`). CLI
//! flags are applied on top by the binary.

use crate::error::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "KG";

/// Server settings, read once at startup
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct KgConfig {
    /// Store location: a file path, `:memory:`, or a `libsql://` / `http(s)://` URL
    pub store_url: String,

    /// Auth token for remote stores (ignored for local files)
    pub store_token: String,

    /// Namespace selector within the store
    pub namespace: String,

    /// Database selector within the namespace
    pub database: String,

    /// Log verbosity (trace, debug, info, warn, error)
    pub trace_level: String,

    /// Upper bound on any single store call
    pub store_timeout_ms: u64,

    /// Connection attempts after the first failure
    pub connect_retries: u32,

    /// Base delay between connection attempts, doubled each retry
    pub retry_backoff_ms: u64,

    /// Largest accepted inbound frame
    pub max_frame_bytes: usize,
}

/// Get the default database path using XDG_DATA_HOME standard
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("knowledge-graph")
        .join("knowledge.db")
}

impl Default for KgConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_path().to_string_lossy().to_string(),
            store_token: String::new(),
            namespace: "development".to_string(),
            database: "knowledge".to_string(),
            trace_level: "info".to_string(),
            store_timeout_ms: 10_000,
            connect_retries: 3,
            retry_backoff_ms: 200,
            max_frame_bytes: 10 * 1024 * 1024,
        }
    }
}

impl KgConfig {
    /// Load settings from defaults, an optional file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = KgConfig::default();

        let mut builder = Config::builder()
            .set_default("store_url", defaults.store_url)?
            .set_default("store_token", defaults.store_token)?
            .set_default("namespace", defaults.namespace)?
            .set_default("database", defaults.database)?
            .set_default("trace_level", defaults.trace_level)?
            .set_default("store_timeout_ms", defaults.store_timeout_ms)?
            .set_default("connect_retries", defaults.connect_retries as u64)?
            .set_default("retry_backoff_ms", defaults.retry_backoff_ms)?
            .set_default("max_frame_bytes", defaults.max_frame_bytes as u64)?;

        if let Some(path) = file {
            debug!("Loading configuration file {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<KgConfig>()?;

        Ok(settings)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clear_env() {
        for key in [
            "KG_STORE_URL",
            "KG_NAMESPACE",
            "KG_STORE_TIMEOUT_MS",
            "KG_TRACE_LEVEL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_sources() {
        clear_env();
        let config = KgConfig::load(None).unwrap();
        assert_eq!(config, KgConfig::default());
        assert_eq!(config.namespace, "development");
        assert_eq!(config.database, "knowledge");
        assert_eq!(config.store_timeout(), Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_env_overrides_defaults() {
        clear_env();
        env::set_var("KG_STORE_URL", ":memory:");
        env::set_var("KG_NAMESPACE", "staging");
        env::set_var("KG_STORE_TIMEOUT_MS", "250");

        let config = KgConfig::load(None).unwrap();
        assert_eq!(config.store_url, ":memory:");
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.store_timeout_ms, 250);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_file_then_env_precedence() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "namespace = \"from-file\"").unwrap();
        writeln!(file, "trace_level = \"debug\"").unwrap();

        env::set_var("KG_TRACE_LEVEL", "warn");
        let config = KgConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.namespace, "from-file");
        assert_eq!(config.trace_level, "warn");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        clear_env();
        let result = KgConfig::load(Some(Path::new("/nonexistent/kg-config.toml")));
        assert!(result.is_err());
    }
}
