//! Configuration file format.
//!
//! Every section is optional; command line values take precedence over
//! anything set here.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use vtuner_core::{DeviceSettings, TunerContext};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "vtuner-server.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub pools: PoolsSection,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSection>,
    #[serde(default, rename = "software_device")]
    pub software_devices: Vec<SoftwareDeviceSection>,
    #[serde(default, rename = "http_tuner")]
    pub http_tuners: Vec<HttpTunerSection>,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub web_listen: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PoolsSection {
    pub use_pools: Option<bool>,
    /// Alias to pool name.
    #[serde(default)]
    pub virtual_tuners: BTreeMap<String, String>,
}

/// Pool and merit for a device, applied whenever it is loaded.
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSection {
    pub name: String,
    pub pool: Option<String>,
    pub merit: Option<i32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SoftwareDeviceSection {
    pub name: String,
    pub source: String,
    #[serde(default = "default_lineup")]
    pub lineup: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpTunerSection {
    pub name: String,
    /// Parent name; defaults to `name`.
    pub parent: Option<String>,
    pub parent_id: u32,
    pub address: IpAddr,
    #[serde(default = "default_tuner_count")]
    pub tuner_count: u32,
    #[serde(default = "default_lineup")]
    pub lineup: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct DiscoverySection {
    pub enabled: Option<bool>,
    pub listen: Option<String>,
    pub stop_timeout_ms: Option<u64>,
    pub stop_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

fn default_lineup() -> String {
    "default".to_string()
}

fn default_tuner_count() -> u32 {
    1
}

impl ConfigFile {
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: ConfigFile = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let names = self
            .devices
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.software_devices.iter().map(|d| d.name.as_str()))
            .chain(self.http_tuners.iter().map(|d| d.name.as_str()));
        for name in names {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("device name must not be empty".into()));
            }
        }

        for tuner in &self.http_tuners {
            if tuner.tuner_count == 0 {
                return Err(ConfigError::Invalid(format!(
                    "http_tuner {} has tuner_count = 0",
                    tuner.name
                )));
            }
        }

        if let Some(listen) = &self.discovery.listen {
            parse_addr(listen, "discovery.listen")?;
        }
        if let Some(listen) = &self.server.web_listen {
            parse_addr(listen, "server.web_listen")?;
        }
        Ok(())
    }

    pub fn web_listen(&self) -> Option<SocketAddr> {
        self.server.web_listen.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn discovery_listen(&self) -> Option<SocketAddr> {
        self.discovery.listen.as_deref().and_then(|s| s.parse().ok())
    }
}

fn parse_addr(value: &str, key: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{} = {:?}: {}", key, value, e)))
}

pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigFile::parse(&contents, path)
}

/// Push virtual tuner aliases and per-device settings into the context.
pub fn apply_pool_settings(context: &TunerContext, config: &ConfigFile) {
    for (alias, pool) in &config.pools.virtual_tuners {
        context.pools().set_virtual_tuner(alias, pool);
        info!("Virtual tuner {} uses pool {}", alias, pool);
    }

    for device in &config.devices {
        let settings = DeviceSettings {
            pool: device.pool.clone(),
            merit: device.merit,
        };
        if let Err(e) = context.configure_device(&device.name, settings) {
            warn!("Failed to apply settings for {}: {}", device.name, e);
        }
    }
}
