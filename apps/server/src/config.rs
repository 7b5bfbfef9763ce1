//! Server configuration management.
//!
//! Configuration is stored as TOML at `$FERRY_CONFIG` when set, otherwise:
//! - Linux: `~/.config/ferry/server.toml`
//! - Windows: `%APPDATA%/ferry/server.toml`

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ferry_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT};
use ferry_store::StoreConfig;
use ferry_upload_server::ServerConfig;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FERRY_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// HTTP port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory for merged files.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Directory for staged chunks.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Chunk size in bytes. Clients must use the same value.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Milliseconds to pause after each write of an append (0 = off).
    #[serde(default)]
    pub append_delay_ms: u64,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            public_dir: default_public_dir(),
            temp_dir: default_temp_dir(),
            chunk_size: default_chunk_size(),
            append_delay_ms: 0,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default there if not
    /// found.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be greater than zero");
        Ok(())
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
        }
    }

    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            public_dir: self.public_dir.clone(),
            temp_dir: self.temp_dir.clone(),
            chunk_size: self.chunk_size,
            append_delay: (self.append_delay_ms > 0)
                .then(|| Duration::from_millis(self.append_delay_ms)),
        }
    }
}

/// Returns the configuration file path.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("ferry").join("server.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("ferry")
            .join("server.toml")
    }
}
