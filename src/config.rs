//! Application-level configuration loading for the station process.

use std::path::PathBuf;
use std::{env, fs, io::ErrorKind};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the station looks for its configuration.
const DEFAULT_CONFIG_PATH: &str = "config/station.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PODIUM_CONFIG_PATH";

const BROKER_ADDR_ENV: &str = "PODIUM_BROKER_ADDR";
const API_URL_ENV: &str = "PODIUM_API_URL";
const DATA_DIR_ENV: &str = "PODIUM_DATA_DIR";

const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:7878";
const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_DATA_DIR: &str = "data";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker endpoint (`host:port`).
    pub broker_addr: String,
    /// Base URL of the HTTP collaborators.
    pub api_base_url: String,
    /// Directory holding the persisted session and the shared lease key.
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Load the configuration from disk, then apply environment overrides,
    /// falling back to baked-in defaults for anything left unset.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded station config");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Some(broker) = non_empty_env(BROKER_ADDR_ENV) {
            config.broker_addr = broker;
        }
        if let Some(api) = non_empty_env(API_URL_ENV) {
            config.api_base_url = api;
        }
        if let Some(dir) = non_empty_env(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker_addr: DEFAULT_BROKER_ADDR.into(),
            api_base_url: DEFAULT_API_URL.into(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

/// JSON representation of the configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    broker_addr: Option<String>,
    #[serde(default)]
    api_base_url: Option<String>,
    #[serde(default)]
    data_dir: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            broker_addr: value.broker_addr.unwrap_or(defaults.broker_addr),
            api_base_url: value.api_base_url.unwrap_or(defaults.api_base_url),
            data_dir: value
                .data_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }
}

/// Resolve the configuration path taking the environment override into
/// account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"broker_addr": "10.0.0.2:7878"}"#).expect("raw parses");
        let config: AppConfig = raw.into();
        assert_eq!(config.broker_addr, "10.0.0.2:7878");
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }
}
