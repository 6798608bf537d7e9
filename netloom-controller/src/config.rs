//! Controller configuration.
//!
//! Loaded from a TOML file (`--config`, or the per-user default location),
//! with every section optional. The bind address can additionally be
//! overridden through the `NETLOOM_BIND` environment variable.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use netloom_shared::ComputeCreate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Computes registered at startup.
    #[serde(default)]
    pub computes: Vec<ComputeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Per-subscriber notification queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Deadline for compute calls, in seconds.
    #[serde(default = "default_compute_timeout")]
    pub compute_timeout_secs: u64,
    /// Interval between reachability probe sweeps, in seconds.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            compute_timeout_secs: default_compute_timeout(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

/// One compute to register at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeEntry {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ComputeEntry {
    pub fn to_create(&self) -> ComputeCreate {
        ComputeCreate {
            compute_id: None,
            name: self.name.clone(),
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3080
}

fn default_queue_capacity() -> usize {
    100
}

fn default_compute_timeout() -> u64 {
    20
}

fn default_probe_interval() -> u64 {
    30
}

fn default_scheme() -> String {
    "http".to_string()
}

impl Config {
    /// Load the configuration. An explicit path must exist; the default
    /// path is optional and silently falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("netloom").join("config.toml"))
    }

    /// The listen address, `NETLOOM_BIND` taking precedence over the file.
    pub fn bind_addr(&self) -> String {
        std::env::var("NETLOOM_BIND")
            .unwrap_or_else(|_| format!("{}:{}", self.server.bind, self.server.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 3080);
        assert_eq!(config.controller.queue_capacity, 100);
        assert_eq!(config.controller.compute_timeout_secs, 20);
        assert!(config.computes.is_empty());
    }

    #[test]
    fn partial_config_overrides_selected_fields() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [controller]
            probe_interval_secs = 5

            [[computes]]
            name = "lab-1"
            host = "10.0.0.5"
            port = 3080
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.controller.probe_interval_secs, 5);
        assert_eq!(config.computes.len(), 1);
        let create = config.computes[0].to_create();
        assert_eq!(create.scheme, "http");
        assert_eq!(create.host, "10.0.0.5");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/netloom.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
