use std::env;
use std::path::PathBuf;

use crate::api::client::API_URL;
use crate::device::client::{BROKER_HOST, BROKER_PORT};

#[derive(Debug, Clone)]
pub struct Config {
    pub account: AccountConfig,
    pub api_url: String,
    pub broker: BrokerConfig,
    /// Serial of the device to follow; only list devices when unset.
    pub device: Option<String>,
    /// JSON file caching the authentication info between runs.
    pub auth_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| format!("{key} environment variable is required"))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let broker_port = match optional("LETPOT_BROKER_PORT") {
            Some(port) => port
                .parse()
                .map_err(|e| format!("LETPOT_BROKER_PORT invalid: {e}"))?,
            None => BROKER_PORT,
        };

        let config = Self {
            account: AccountConfig {
                email: required("LETPOT_EMAIL")?,
                password: required("LETPOT_PASSWORD")?,
            },
            api_url: optional("LETPOT_API_URL").unwrap_or_else(|| API_URL.to_string()),
            broker: BrokerConfig {
                host: optional("LETPOT_BROKER_HOST").unwrap_or_else(|| BROKER_HOST.to_string()),
                port: broker_port,
            },
            device: optional("LETPOT_DEVICE"),
            auth_file: optional("LETPOT_AUTH_FILE").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.account.email.is_empty() {
            return Err("LETPOT_EMAIL must not be empty".into());
        }
        if self.account.password.is_empty() {
            return Err("LETPOT_PASSWORD must not be empty".into());
        }
        if self.broker.port == 0 {
            return Err("LETPOT_BROKER_PORT must be > 0".into());
        }
        Ok(())
    }
}
