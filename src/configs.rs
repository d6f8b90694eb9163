use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PkiError, Result};
use crate::key_factory::KeyAlgorithm;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "pki-local.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub key: KeyAlgorithm,
    #[serde(default)]
    pub defaults: Defaults,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("store.json")
}

/// Common names used when a command is run without one
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Defaults {
    #[serde(default = "default_ca_common_name")]
    pub ca_common_name: String,
    #[serde(default = "default_client_common_name")]
    pub client_common_name: String,
    #[serde(default = "default_server_common_name")]
    pub server_common_name: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            ca_common_name: default_ca_common_name(),
            client_common_name: default_client_common_name(),
            server_common_name: default_server_common_name(),
        }
    }
}

fn default_ca_common_name() -> String {
    "pki-local Root CA".to_string()
}

fn default_client_common_name() -> String {
    "client".to_string()
}

fn default_server_common_name() -> String {
    "server".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|e| {
            PkiError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&config_str)
            .map_err(|e| e.context(format!("load config file {}", path.display())))
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str)
            .map_err(|e| PkiError::Config(format!("failed to parse config: {e}")))
    }

    /// Load configuration from `path`, or from the default path when none is given.
    ///
    /// A missing file at the default path yields the built-in defaults; an explicitly
    /// requested file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match fs::metadata(DEFAULT_CONFIG_PATH) {
                Ok(_) => Self::from_file(DEFAULT_CONFIG_PATH),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("No {DEFAULT_CONFIG_PATH} found, using built-in defaults");
                    Ok(Self::default())
                }
                Err(e) => Err(PkiError::Config(format!(
                    "failed to stat {DEFAULT_CONFIG_PATH}: {e}"
                ))),
            },
        }
    }
}
