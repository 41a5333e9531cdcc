//! Mempool.space data source.

use super::esplora::EsploraRest;
use super::http::{HttpClient, HttpRequest};
use super::{Capability, DataSource, MEMPOOL_SPACE};
use crate::network::NetworkType;
use crate::types::{FeeEstimate, TransactionInfo, Utxo};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// `/api/v1/fees/recommended`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolRecommendedFees {
    pub fastest_fee: f64,
    #[serde(default)]
    pub half_hour_fee: f64,
    #[serde(default)]
    pub hour_fee: f64,
    #[serde(default)]
    pub economy_fee: f64,
    pub minimum_fee: f64,
}

pub struct MempoolSpaceDataSource {
    rest: EsploraRest,
    http: Arc<dyn HttpClient>,
    overrides: HashMap<NetworkType, String>,
}

impl MempoolSpaceDataSource {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            rest: EsploraRest::new(http.clone(), "MempoolSpace"),
            http,
            overrides: HashMap::new(),
        }
    }

    /// Points one network at a custom mempool instance.
    pub fn with_url(mut self, network: NetworkType, url: impl Into<String>) -> Self {
        self.overrides
            .insert(network, url.into().trim_end_matches('/').to_string());
        self
    }

    fn api_url(&self, network: NetworkType) -> String {
        let base = self
            .overrides
            .get(&network)
            .map(String::as_str)
            .unwrap_or_else(|| network.mempool_url());
        format!("{base}/api")
    }
}

const MEMPOOL_CAPABILITIES: &[Capability] = &[
    Capability::Utxos,
    Capability::Balance,
    Capability::Transaction,
    Capability::Fees,
    Capability::Broadcast,
];

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DataSource for MempoolSpaceDataSource {
    fn name(&self) -> &str {
        MEMPOOL_SPACE
    }

    fn capabilities(&self) -> &[Capability] {
        MEMPOOL_CAPABILITIES
    }

    async fn get_address_utxos(&self, network: NetworkType, address: &str) -> Result<Vec<Utxo>> {
        self.rest.address_utxos(&self.api_url(network), address).await
    }

    async fn get_balance(&self, network: NetworkType, address: &str) -> Result<u64> {
        self.rest.address_balance(&self.api_url(network), address).await
    }

    async fn get_transaction(&self, network: NetworkType, txid: &str) -> Result<Option<TransactionInfo>> {
        self.rest.transaction(&self.api_url(network), txid).await
    }

    async fn get_recommended_fees(&self, network: NetworkType) -> Result<FeeEstimate> {
        let url = format!("{}/v1/fees/recommended", self.api_url(network));
        log::info!("[MempoolSpace] Using direct HTTP GET to {}", url);
        let response = self.http.send(HttpRequest::get(url)).await?;
        let fees: MempoolRecommendedFees = response.json("fees/recommended")?;
        Ok(FeeEstimate {
            fast_fee: fees.fastest_fee,
            min_fee: fees.minimum_fee,
        })
    }

    async fn broadcast_transaction(&self, network: NetworkType, tx_hex: &str) -> Result<String> {
        self.rest.broadcast(&self.api_url(network), tx_hex).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::http::{HttpMethod, HttpResponse, MockHttpClient};

    #[tokio::test]
    async fn routes_each_network_to_its_mempool_instance() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url == "https://mempool.space/testnet4/api/v1/fees/recommended")
            .returning(|_| {
                Ok(HttpResponse::ok(
                    r#"{"fastestFee":12,"halfHourFee":8,"hourFee":6,"economyFee":3,"minimumFee":1}"#,
                ))
            });
        let source = MempoolSpaceDataSource::new(Arc::new(http));
        let fees = source.get_recommended_fees(NetworkType::Testnet4).await.unwrap();
        assert_eq!(fees.fast_fee, 12.0);
        assert_eq!(fees.min_fee, 1.0);
    }

    #[tokio::test]
    async fn broadcast_posts_plain_text_hex() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| {
                req.method == HttpMethod::Post
                    && req.url == "https://mempool.example/api/tx"
                    && req.body.as_deref() == Some("0200")
                    && req.headers.iter().any(|(k, v)| k == "Content-Type" && v == "text/plain")
            })
            .returning(|_| Ok(HttpResponse::ok("c0ffee\n")));
        let source = MempoolSpaceDataSource::new(Arc::new(http)).with_url(NetworkType::Mainnet, "https://mempool.example/");
        let txid = source.broadcast_transaction(NetworkType::Mainnet, "0200").await.unwrap();
        assert_eq!(txid, "c0ffee");
    }
}
