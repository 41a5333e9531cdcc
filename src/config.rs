//! Client configuration.
//!
//! The JSON shape mirrors what host applications already pass around:
//!
//! ```json
//! {
//!   "network": "mainnet",
//!   "dataSources": {
//!     "maestro": { "apiKey": "..." },
//!     "sandshrew": { "url": "https://mainnet.sandshrew.io/v2", "apiKey": "lasereyes" },
//!     "mempool": { "url": "https://mempool.space" },
//!     "esplora": "https://blockstream.info/api"
//!   },
//!   "walletOptions": { "autoConnect": true, "defaultProvider": "unisat", "timeout": 10000 },
//!   "cacheOptions": { "ttl": 30000, "maxSize": 256 },
//!   "requestTimeout": 30000
//! }
//! ```

use crate::network::NetworkType;
use crate::wallet::ProviderId;
use crate::{LaserEyesError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SANDSHREW_API_KEY: &str = "lasereyes";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_WALLET_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub network: NetworkType,
    #[serde(default)]
    pub data_sources: DataSourcesConfig,
    #[serde(default)]
    pub wallet_options: Option<WalletOptions>,
    #[serde(default)]
    pub cache_options: Option<CacheOptions>,
    /// Milliseconds a single data-source request may take.
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourcesConfig {
    pub maestro: Option<MaestroConfig>,
    pub sandshrew: Option<SandshrewConfig>,
    pub mempool: Option<MempoolConfig>,
    pub esplora: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaestroConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandshrewConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletOptions {
    #[serde(default)]
    pub auto_connect: bool,
    pub default_provider: Option<ProviderId>,
    /// Milliseconds to wait for an extension to inject its global.
    #[serde(default = "default_wallet_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheOptions {
    /// Entry lifetime in milliseconds.
    pub ttl: u64,
    pub max_size: usize,
}

fn default_wallet_timeout() -> u64 {
    DEFAULT_WALLET_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet,
            data_sources: DataSourcesConfig {
                maestro: None,
                sandshrew: Some(SandshrewConfig::default()),
                mempool: Some(MempoolConfig::default()),
                esplora: None,
            },
            wallet_options: None,
            cache_options: None,
            request_timeout: None,
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| LaserEyesError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Rejects malformed URLs and empty credentials.
    pub fn validate(&self) -> Result<()> {
        let urls = [
            self.data_sources.sandshrew.as_ref().and_then(|s| s.url.as_deref()),
            self.data_sources.mempool.as_ref().and_then(|m| m.url.as_deref()),
            self.data_sources.esplora.as_deref(),
        ];
        for url in urls.into_iter().flatten() {
            url::Url::parse(url).map_err(|e| LaserEyesError::Config(format!("invalid url {url}: {e}")))?;
        }
        if let Some(maestro) = &self.data_sources.maestro {
            if maestro.api_key.trim().is_empty() {
                return Err(LaserEyesError::Config("maestro apiKey must not be empty".to_string()));
            }
        }
        if self.request_timeout == Some(0) {
            return Err(LaserEyesError::Config("requestTimeout must be positive".to_string()));
        }
        if let Some(cache) = &self.cache_options {
            if cache.max_size == 0 {
                return Err(LaserEyesError::Config("cacheOptions.maxSize must be positive".to_string()));
            }
        }
        Ok(())
    }

    pub fn sandshrew_api_key(&self) -> &str {
        self.data_sources
            .sandshrew
            .as_ref()
            .and_then(|s| s.api_key.as_deref())
            .unwrap_or(DEFAULT_SANDSHREW_API_KEY)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS))
    }

    pub fn wallet_timeout(&self) -> Duration {
        Duration::from_millis(
            self.wallet_options
                .as_ref()
                .map(|w| w.timeout)
                .unwrap_or(DEFAULT_WALLET_TIMEOUT_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_configuration() {
        let config = Config::from_json_str(
            r#"{
                "network": "testnet4",
                "dataSources": {
                    "maestro": { "apiKey": "secret" },
                    "sandshrew": { "apiKey": "custom" },
                    "mempool": { "url": "https://mempool.example.com" },
                    "esplora": "https://esplora.example.com/api"
                },
                "walletOptions": { "autoConnect": true, "defaultProvider": "magic-eden", "timeout": 2500 },
                "cacheOptions": { "ttl": 30000, "maxSize": 64 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.network, NetworkType::Testnet4);
        assert_eq!(config.sandshrew_api_key(), "custom");
        assert_eq!(config.data_sources.esplora.as_deref(), Some("https://esplora.example.com/api"));
        let wallet = config.wallet_options.as_ref().unwrap();
        assert_eq!(wallet.default_provider, Some(ProviderId::MagicEden));
        assert_eq!(config.wallet_timeout(), Duration::from_millis(2500));
        assert_eq!(config.cache_options.as_ref().unwrap().max_size, 64);
        assert_eq!(config.request_timeout(), Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS));
    }

    #[test]
    fn defaults_apply_to_sparse_configuration() {
        let config = Config::from_json_str(r#"{ "network": "signet" }"#).unwrap();
        assert_eq!(config.sandshrew_api_key(), DEFAULT_SANDSHREW_API_KEY);
        assert!(config.cache_options.is_none());
        assert_eq!(config.wallet_timeout(), Duration::from_millis(DEFAULT_WALLET_TIMEOUT_MS));
    }

    #[test]
    fn request_timeout_is_configurable_but_not_zero() {
        let config = Config::from_json_str(r#"{ "requestTimeout": 4000 }"#).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(4000));
        let err = Config::from_json_str(r#"{ "requestTimeout": 0 }"#).unwrap_err();
        assert!(matches!(err, LaserEyesError::Config(_)));
    }

    #[test]
    fn rejects_bad_urls() {
        let err = Config::from_json_str(r#"{ "dataSources": { "esplora": "not a url" } }"#).unwrap_err();
        assert!(matches!(err, LaserEyesError::Config(_)));
    }
}
