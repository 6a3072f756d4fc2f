//! Configuration loading from `~/.ethmem/config.toml` with defaults.

use ethmem_types::config::{ethmem_home, EthMemConfig};
use ethmem_types::error::{EthMemError, EthMemResult};
use std::path::{Path, PathBuf};
use tracing::info;

/// Load configuration from a TOML file, with defaults.
///
/// A missing file is not an error. An unreadable or malformed file is
/// logged and replaced by defaults so the pipeline still comes up.
pub fn load_config(path: Option<&Path>) -> EthMemConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<EthMemConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    EthMemConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    ethmem_home().join("config.toml")
}

/// Write `api_key` into `[remote] api_key` of the file at `path`.
///
/// Other keys already in the file are preserved. The file and its parent
/// directory are created when missing.
pub fn save_api_key(path: &Path, api_key: &str) -> EthMemResult<()> {
    let mut root = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str::<toml::Value>(&contents)
            .map_err(|e| EthMemError::Config(format!("{}: {e}", path.display())))?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    let table = root
        .as_table_mut()
        .ok_or_else(|| EthMemError::Config("config root is not a table".into()))?;
    let remote = table
        .entry("remote")
        .or_insert(toml::Value::Table(toml::map::Map::new()));
    let remote = remote
        .as_table_mut()
        .ok_or_else(|| EthMemError::Config("[remote] is not a table".into()))?;
    remote.insert(
        "api_key".to_string(),
        toml::Value::String(api_key.trim().to_string()),
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered =
        toml::to_string_pretty(&root).map_err(|e| EthMemError::Serialization(e.to_string()))?;
    std::fs::write(path, rendered)?;
    info!(path = %path.display(), "API key saved");
    Ok(())
}
