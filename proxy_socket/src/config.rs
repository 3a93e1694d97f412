use crate::Error;

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub proxies: Option<Vec<ProxyConfig>>,
    pub no_proxy: Option<Vec<String>>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub protocol: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub server: String,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config = tokio::fs::read_to_string(path).await?;
        Self::from_json5(&config)
    }

    pub fn from_json5(config: &str) -> Result<Self, Error> {
        json5::from_str(config).map_err(|e| Error::Config(e.to_string()))
    }

    /// Bound on each connection attempt, if any.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}
