// Configuration module - settings for both roles
//
// Collector: a JSON file provisioned alongside the host
//   --config <path>  >  $GPU_METRICS_CONFIG  >  /etc/gpu-metrics/config.json
//
// Server: environment variables with built-in defaults
//   PORT, MONGODB_URI, MONGODB_DATABASE

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Default location of the collector's config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gpu-metrics/config.json";

/// Environment variable overriding the collector config path
pub const CONFIG_PATH_ENV: &str = "GPU_METRICS_CONFIG";

/// Collection interval used when the file does not set a positive one
pub const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 60;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
const DEFAULT_DATABASE: &str = "vlgpus";

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    #[error("{0} is required")]
    MissingRequiredSetting(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Collector settings, loaded once at startup
///
/// # Example File
/// ```json
/// {
///   "instance_id": "gpu-host-1",
///   "api_key": "3f1c...",
///   "metrics_url": "https://metrics.example.com/metrics",
///   "collect_interval_seconds": 30
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Identity assigned when the host was provisioned
    #[serde(default)]
    pub instance_id: String,

    /// Bearer credential matching `instance_id` on the server
    #[serde(default)]
    pub api_key: String,

    /// Full URL of the ingestion endpoint
    #[serde(default)]
    pub metrics_url: String,

    /// Seconds between cycles; zero, negative or absent means 60
    #[serde(default)]
    pub collect_interval_seconds: i64,
}

impl CollectorConfig {
    /// Loads and validates the config file
    ///
    /// # Arguments
    /// * `explicit` - Path given on the command line, if any
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_config_path(explicit, env::var(CONFIG_PATH_ENV).ok());
        info!("Loading collector configuration from {}", path.display());

        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Unreadable {
            path: path.clone(),
            source,
        })?;

        Self::from_json(&data)
    }

    /// Parses and validates config file contents
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: CollectorConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::MissingRequiredSetting("instance_id"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequiredSetting("api_key"));
        }
        if self.metrics_url.trim().is_empty() {
            return Err(ConfigError::MissingRequiredSetting("metrics_url"));
        }
        Ok(())
    }

    /// Time between the start of two collection cycles
    pub fn collect_interval(&self) -> Duration {
        let secs = u64::try_from(self.collect_interval_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_COLLECT_INTERVAL_SECS);
        Duration::from_secs(secs)
    }
}

/// Picks the config file: explicit flag, then environment, then default
fn resolve_config_path(explicit: Option<&Path>, from_env: Option<String>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| from_env.filter(|p| !p.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Ingestion server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port for the HTTP listener
    pub port: u16,

    /// MongoDB connection URI
    pub mongodb_uri: String,

    /// Database holding `instances` and `gpu_metrics`
    pub database_name: String,
}

impl ServerConfig {
    /// Reads settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from any variable source; unset or empty values fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let port = match get("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue { name: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        Ok(ServerConfig {
            port,
            mongodb_uri: get("MONGODB_URI").unwrap_or_else(|| DEFAULT_MONGODB_URI.to_string()),
            database_name: get("MONGODB_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
        })
    }

    /// Address the listener binds to (all interfaces)
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const VALID: &str = r#"{
        "instance_id": "gpu-host-1",
        "api_key": "key-1",
        "metrics_url": "http://localhost:8080/metrics",
        "collect_interval_seconds": 30
    }"#;

    #[test]
    fn test_collector_config_parses() {
        let config = CollectorConfig::from_json(VALID).unwrap();

        assert_eq!(config.instance_id, "gpu-host-1");
        assert_eq!(config.api_key, "key-1");
        assert_eq!(config.metrics_url, "http://localhost:8080/metrics");
        assert_eq!(config.collect_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_interval_defaults_to_sixty_seconds() {
        for interval in ["", r#", "collect_interval_seconds": 0"#, r#", "collect_interval_seconds": -5"#] {
            let json = format!(
                r#"{{"instance_id":"a","api_key":"b","metrics_url":"c"{}}}"#,
                interval
            );
            let config = CollectorConfig::from_json(&json).unwrap();
            assert_eq!(config.collect_interval(), Duration::from_secs(60));
        }
    }

    #[test]
    fn test_required_fields() {
        let cases = [
            (r#"{"api_key":"b","metrics_url":"c"}"#, "instance_id"),
            (r#"{"instance_id":"a","api_key":"","metrics_url":"c"}"#, "api_key"),
            (r#"{"instance_id":"a","api_key":"b"}"#, "metrics_url"),
        ];

        for (json, field) in cases {
            match CollectorConfig::from_json(json) {
                Err(ConfigError::MissingRequiredSetting(missing)) => assert_eq!(missing, field),
                other => panic!("expected missing {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            CollectorConfig::from_json("{"),
            Err(ConfigError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = CollectorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.instance_id, "gpu-host-1");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.json");

        assert!(matches!(
            CollectorConfig::load(Some(&missing)),
            Err(ConfigError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_config_path_precedence() {
        let flag = Path::new("/tmp/flag.json");

        assert_eq!(
            resolve_config_path(Some(flag), Some("/tmp/env.json".to_string())),
            PathBuf::from("/tmp/flag.json")
        );
        assert_eq!(
            resolve_config_path(None, Some("/tmp/env.json".to_string())),
            PathBuf::from("/tmp/env.json")
        );
        assert_eq!(
            resolve_config_path(None, Some(String::new())),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
        assert_eq!(resolve_config_path(None, None), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.mongodb_uri, "mongodb://localhost:27017");
        assert_eq!(config.database_name, "vlgpus");
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_server_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("MONGODB_URI", "mongodb://db:27017/?replicaSet=rs0"),
            ("MONGODB_DATABASE", "telemetry"),
        ]
        .into_iter()
        .collect();

        let config = ServerConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.mongodb_uri, "mongodb://db:27017/?replicaSet=rs0");
        assert_eq!(config.database_name, "telemetry");
    }

    #[test]
    fn test_server_rejects_bad_port() {
        let result = ServerConfig::from_lookup(|name| (name == "PORT").then(|| "http".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidValue { name: "PORT", .. })));
    }
}
