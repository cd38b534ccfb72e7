// src/config.rs
use std::env;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "NFC_SERVICE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Service configuration. Every field has a default, so an empty JSON object
/// is a valid config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub collision_backoff_ms: u64,
    pub session_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub keep_session_open: bool,
    pub alert_message: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3500,
            collision_backoff_ms: 500,
            session_timeout_secs: 60,
            poll_interval_ms: 500,
            keep_session_open: false,
            alert_message: "Hold your tag near the reader.".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Defaults, then the JSON file named by `NFC_SERVICE_CONFIG`, then
    /// individual environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("NFC_SERVICE_BIND") {
            self.bind_address = parse_value("NFC_SERVICE_BIND", &value)?;
        }
        if let Some(value) = lookup("NFC_SERVICE_PORT") {
            self.port = parse_value("NFC_SERVICE_PORT", &value)?;
        }
        if let Some(value) = lookup("NFC_COLLISION_BACKOFF_MS") {
            self.collision_backoff_ms = parse_value("NFC_COLLISION_BACKOFF_MS", &value)?;
        }
        if let Some(value) = lookup("NFC_SESSION_TIMEOUT_SECS") {
            self.session_timeout_secs = parse_value("NFC_SESSION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("NFC_KEEP_SESSION_OPEN") {
            self.keep_session_open = parse_value("NFC_KEEP_SESSION_OPEN", &value)?;
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn collision_backoff(&self) -> Duration {
        Duration::from_millis(self.collision_backoff_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
