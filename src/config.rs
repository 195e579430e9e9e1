use log::{debug, info, warn};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::utils::normalize_mac;

const CONFIG_PATH_VAR: &str = "GATEWAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "gateway.env";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    File {
        path: String,
        #[source]
        source: dotenv::Error,
    },
    #[error("{0} is not set in the configuration")]
    Missing(&'static str),
    #[error("DATA_ENDPOINT is not a valid URL")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub data_endpoint: Url,
    pub api_key: String,
    pub request_timeout: Duration,
    /// Known meters, MAC -> name. Empty means every meter is forwarded.
    pub devices: HashMap<String, String>,
}

impl GatewayConfig {
    /// Load the key/value file named by `GATEWAY_CONFIG` (default
    /// `gateway.env`) into the environment and read the settings from it.
    /// Variables already present in the environment take precedence.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        dotenv::from_path(&path).map_err(|source| ConfigError::File {
            path: path.clone(),
            source,
        })?;
        info!("Loaded configuration from {}", path);

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let data_endpoint = Url::parse(&required("DATA_ENDPOINT")?)?;
        let api_key = required("API_KEY")?;

        let request_timeout = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "REQUEST_TIMEOUT_SECS",
                        value,
                    })
                }
            },
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let devices = lookup("SWITCHBOT_DEVICES")
            .map(|value| parse_devices(&value))
            .unwrap_or_default();

        if devices.is_empty() {
            info!("No SWITCHBOT_DEVICES configured, forwarding every meter");
        }
        for (mac, name) in &devices {
            debug!("Device: {} -> {}", mac, name);
        }

        Ok(GatewayConfig {
            data_endpoint,
            api_key,
            request_timeout,
            devices,
        })
    }

    /// Whether readings from this device should be forwarded
    pub fn accepts(&self, device_id: &str) -> bool {
        self.devices.is_empty() || self.devices.contains_key(device_id)
    }

    /// Human-readable label for log lines
    pub fn label<'a>(&'a self, device_id: &'a str) -> &'a str {
        self.devices
            .get(device_id)
            .map(String::as_str)
            .unwrap_or(device_id)
    }
}

/// Parse `mac=name,mac=name` pairs, skipping malformed entries
fn parse_devices(value: &str) -> HashMap<String, String> {
    let mut devices = HashMap::new();

    for pair in value.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((mac, name)) if !mac.trim().is_empty() && !name.trim().is_empty() => {
                devices.insert(normalize_mac(mac), name.trim().to_string());
            }
            _ => warn!("Ignoring malformed SWITCHBOT_DEVICES entry: '{}'", pair),
        }
    }

    devices
}
