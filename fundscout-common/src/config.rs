//! Configuration loading and resolution
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Default gateway endpoint when nothing else is configured
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:5850";

/// Default listen port for the engine control surface
pub const DEFAULT_LISTEN_PORT: u16 = 5840;

/// Optional TOML configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Remote job gateway base URL
    pub gateway_url: Option<String>,
    /// Engine listen port
    pub listen_port: Option<u16>,
    /// Data directory for the SQLite store
    pub data_dir: Option<String>,
    /// Initial reconnect delay for progress subscriptions (milliseconds)
    pub reconnect_initial_ms: Option<u64>,
    /// Reconnect delay ceiling (milliseconds)
    pub reconnect_max_ms: Option<u64>,
    /// Minimum interval between gateway invocations (milliseconds)
    pub gateway_min_interval_ms: Option<u64>,
}

/// Load the TOML config file if one exists
///
/// Looks for `~/.config/fundscout/config.toml`, then
/// `/etc/fundscout/config.toml` on Linux.
pub fn load_config_file() -> Result<TomlConfig> {
    let path = match find_config_file() {
        Some(path) => path,
        None => return Ok(TomlConfig::default()),
    };

    let contents = std::fs::read_to_string(&path)?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
}

fn find_config_file() -> Option<PathBuf> {
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("fundscout").join("config.toml"))
    {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fundscout/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the gateway base URL (CLI > env > TOML > default)
pub fn resolve_gateway_url(cli_arg: Option<&str>, file: &TomlConfig) -> String {
    if let Some(url) = cli_arg {
        return url.trim_end_matches('/').to_string();
    }
    if let Ok(url) = std::env::var("FUNDSCOUT_GATEWAY_URL") {
        return url.trim_end_matches('/').to_string();
    }
    if let Some(url) = &file.gateway_url {
        return url.trim_end_matches('/').to_string();
    }
    DEFAULT_GATEWAY_URL.to_string()
}

/// Resolve the listen port (CLI > env > TOML > default)
pub fn resolve_listen_port(cli_arg: Option<u16>, file: &TomlConfig) -> u16 {
    if let Some(port) = cli_arg {
        return port;
    }
    if let Ok(port) = std::env::var("FUNDSCOUT_PORT") {
        if let Ok(port) = port.parse() {
            return port;
        }
    }
    file.listen_port.unwrap_or(DEFAULT_LISTEN_PORT)
}

/// Resolve the data directory (CLI > env > TOML > OS-dependent default)
pub fn resolve_data_dir(cli_arg: Option<&str>, file: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("FUNDSCOUT_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Some(path) = &file.data_dir {
        return PathBuf::from(path);
    }
    default_data_dir()
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fundscout"))
        .unwrap_or_else(|| PathBuf::from("./fundscout_data"))
}

/// Ensure the data directory exists, creating it if missing
pub fn ensure_data_dir(dir: &PathBuf) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
