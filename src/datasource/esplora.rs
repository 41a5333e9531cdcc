//! Esplora REST responses and the Esplora data source.
//!
//! Mempool.space and Sandshrew speak the same response shapes, so the
//! structures and conversions here are shared with those providers:
//! - REST: `/address/{address}/utxo` (Sandshrew: `esplora_address::utxo`)
//! - REST: `/tx/{txid}` (Sandshrew: `esplora_tx`)
//! - REST: `/fee-estimates` (Sandshrew: `esplora_fee-estimates`)

use super::http::{HttpClient, HttpRequest};
use super::{Capability, DataSource, ESPLORA};
use crate::network::NetworkType;
use crate::types::{FeeEstimate, TransactionInfo, TxOutputInfo, Utxo};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EsploraTransactionStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsploraUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    #[serde(default)]
    pub status: EsploraTransactionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsploraTxOut {
    #[serde(default)]
    pub scriptpubkey: String,
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsploraTransaction {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<EsploraTxOut>,
    #[serde(default)]
    pub status: EsploraTransactionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EsploraAddressStats {
    pub funded_txo_sum: u64,
    pub spent_txo_sum: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsploraAddressInfo {
    pub address: String,
    #[serde(default)]
    pub chain_stats: EsploraAddressStats,
    #[serde(default)]
    pub mempool_stats: EsploraAddressStats,
}

/// `/fee-estimates`: confirmation target in blocks to sat/vB.
pub type EsploraFeeEstimates = BTreeMap<String, f64>;

impl From<EsploraUtxo> for Utxo {
    fn from(u: EsploraUtxo) -> Self {
        let mut utxo = Utxo::new(u.txid, u.vout, u.value);
        utxo.confirmations = u64::from(u.status.confirmed);
        utxo
    }
}

impl From<EsploraTransaction> for TransactionInfo {
    fn from(tx: EsploraTransaction) -> Self {
        TransactionInfo {
            txid: tx.txid,
            confirmed: tx.status.confirmed,
            block_height: tx.status.block_height,
            outputs: tx
                .vout
                .into_iter()
                .map(|o| TxOutputInfo {
                    value: o.value,
                    script_pub_key: o.scriptpubkey,
                    address: o.scriptpubkey_address,
                })
                .collect(),
        }
    }
}

impl EsploraAddressInfo {
    pub fn balance(&self) -> u64 {
        let funded = self.chain_stats.funded_txo_sum + self.mempool_stats.funded_txo_sum;
        let spent = self.chain_stats.spent_txo_sum + self.mempool_stats.spent_txo_sum;
        funded.saturating_sub(spent)
    }
}

/// Next-block rate as the fast fee, slowest advertised target as the floor.
pub fn fee_estimate_from_targets(estimates: &EsploraFeeEstimates) -> Result<FeeEstimate> {
    let mut targets: Vec<(u32, f64)> = estimates
        .iter()
        .filter_map(|(k, v)| k.parse::<u32>().ok().map(|t| (t, *v)))
        .collect();
    targets.sort_by_key(|(t, _)| *t);
    let fast_fee = targets
        .first()
        .map(|(_, v)| *v)
        .ok_or_else(|| LaserEyesError::Serialization("empty fee estimates".to_string()))?;
    let min_fee = targets.last().map(|(_, v)| *v).unwrap_or(fast_fee);
    Ok(FeeEstimate { fast_fee, min_fee })
}

/// REST calls shared by every Esplora-compatible HTTP API.
#[derive(Clone)]
pub struct EsploraRest {
    http: Arc<dyn HttpClient>,
    label: &'static str,
}

impl EsploraRest {
    pub fn new(http: Arc<dyn HttpClient>, label: &'static str) -> Self {
        Self { http, label }
    }

    pub async fn address_utxos(&self, base: &str, address: &str) -> Result<Vec<Utxo>> {
        let url = format!("{base}/address/{address}/utxo");
        log::info!("[{}] Using direct HTTP GET to {}", self.label, url);
        let response = self.http.send(HttpRequest::get(url)).await?;
        let utxos: Vec<EsploraUtxo> = response.json("address utxo")?;
        Ok(utxos.into_iter().map(Utxo::from).collect())
    }

    pub async fn address_balance(&self, base: &str, address: &str) -> Result<u64> {
        let url = format!("{base}/address/{address}");
        log::info!("[{}] Using direct HTTP GET to {}", self.label, url);
        let response = self.http.send(HttpRequest::get(url)).await?;
        let info: EsploraAddressInfo = response.json("address")?;
        Ok(info.balance())
    }

    pub async fn transaction(&self, base: &str, txid: &str) -> Result<Option<TransactionInfo>> {
        let url = format!("{base}/tx/{txid}");
        log::debug!("[{}] Using direct HTTP GET to {}", self.label, url);
        let response = self.http.send(HttpRequest::get(url)).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        let tx: EsploraTransaction = response.json("tx")?;
        Ok(Some(tx.into()))
    }

    pub async fn fee_estimates(&self, base: &str) -> Result<FeeEstimate> {
        let url = format!("{base}/fee-estimates");
        let response = self.http.send(HttpRequest::get(url)).await?;
        let estimates: EsploraFeeEstimates = response.json("fee-estimates")?;
        fee_estimate_from_targets(&estimates)
    }

    pub async fn broadcast(&self, base: &str, tx_hex: &str) -> Result<String> {
        let url = format!("{base}/tx");
        log::info!("[{}] Broadcasting transaction via {}", self.label, url);
        let response = self.http.send(HttpRequest::post(url, tx_hex, "text/plain")).await?;
        if !response.is_success() {
            return Err(LaserEyesError::BroadcastFailed(format!(
                "{} returned HTTP {}: {}",
                self.label, response.status, response.body
            )));
        }
        Ok(response.body.trim().to_string())
    }
}

/// A self-hosted or third-party Esplora instance at a fixed URL.
pub struct EsploraDataSource {
    rest: EsploraRest,
    url: String,
}

impl EsploraDataSource {
    pub fn new(http: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            rest: EsploraRest::new(http, "Esplora"),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

const ESPLORA_CAPABILITIES: &[Capability] = &[
    Capability::Utxos,
    Capability::Balance,
    Capability::Transaction,
    Capability::Fees,
    Capability::Broadcast,
];

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DataSource for EsploraDataSource {
    fn name(&self) -> &str {
        ESPLORA
    }

    fn capabilities(&self) -> &[Capability] {
        ESPLORA_CAPABILITIES
    }

    async fn get_address_utxos(&self, _network: NetworkType, address: &str) -> Result<Vec<Utxo>> {
        self.rest.address_utxos(&self.url, address).await
    }

    async fn get_balance(&self, _network: NetworkType, address: &str) -> Result<u64> {
        self.rest.address_balance(&self.url, address).await
    }

    async fn get_transaction(&self, _network: NetworkType, txid: &str) -> Result<Option<TransactionInfo>> {
        self.rest.transaction(&self.url, txid).await
    }

    async fn get_recommended_fees(&self, _network: NetworkType) -> Result<FeeEstimate> {
        self.rest.fee_estimates(&self.url).await
    }

    async fn broadcast_transaction(&self, _network: NetworkType, tx_hex: &str) -> Result<String> {
        self.rest.broadcast(&self.url, tx_hex).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::http::{HttpResponse, MockHttpClient};

    #[test]
    fn fee_targets_pick_fastest_and_slowest() {
        let mut estimates = EsploraFeeEstimates::new();
        estimates.insert("1".into(), 21.5);
        estimates.insert("6".into(), 9.0);
        estimates.insert("144".into(), 2.0);
        estimates.insert("1008".into(), 1.0);
        let fees = fee_estimate_from_targets(&estimates).unwrap();
        assert_eq!(fees.fast_fee, 21.5);
        assert_eq!(fees.min_fee, 1.0);
    }

    #[test]
    fn balance_sums_chain_and_mempool() {
        let info: EsploraAddressInfo = serde_json::from_str(
            r#"{"address":"x","chain_stats":{"funded_txo_sum":10000,"spent_txo_sum":4000},
                "mempool_stats":{"funded_txo_sum":500,"spent_txo_sum":0}}"#,
        )
        .unwrap();
        assert_eq!(info.balance(), 6500);
    }

    #[tokio::test]
    async fn missing_transaction_is_none() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url == "https://esplora.example/tx/abcd")
            .returning(|_| Ok(HttpResponse { status: 404, body: "Transaction not found".into() }));
        let source = EsploraDataSource::new(Arc::new(http), "https://esplora.example/");
        let tx = source.get_transaction(NetworkType::Mainnet, "abcd").await.unwrap();
        assert!(tx.is_none());
    }

    #[tokio::test]
    async fn utxos_are_normalized() {
        let mut http = MockHttpClient::new();
        http.expect_send().returning(|_| {
            Ok(HttpResponse::ok(
                r#"[{"txid":"aa","vout":1,"value":1500,"status":{"confirmed":true,"block_height":800000}}]"#,
            ))
        });
        let source = EsploraDataSource::new(Arc::new(http), "https://esplora.example");
        let utxos = source.get_address_utxos(NetworkType::Mainnet, "bc1q").await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value, 1500);
        assert_eq!(utxos[0].confirmations, 1);
    }
}
