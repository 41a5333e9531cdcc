//! Maestro indexer REST API.
//!
//! Every response is wrapped in `{ "data": ..., "last_updated": ... }`.
//! Maestro only serves mainnet and testnet4.

use super::http::{HttpClient, HttpRequest, HttpResponse};
use super::{Capability, DataSource, MAESTRO};
use crate::network::NetworkType;
use crate::types::{FeeEstimate, Inscription, MetaBalance, Protocol, RuneInfo, TransactionInfo, TxOutputInfo, Utxo};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroUtxo {
    pub txid: String,
    pub vout: u32,
    pub satoshis: String,
    #[serde(default)]
    pub script_pubkey: String,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub inscriptions: Vec<JsonValue>,
    #[serde(default)]
    pub runes: Vec<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroTxOutput {
    pub satoshis: String,
    #[serde(default)]
    pub script_pubkey: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroTransaction {
    pub txid: String,
    pub height: Option<u64>,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub outputs: Vec<MaestroTxOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroSatsPerVb {
    pub min: f64,
    pub median: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroFeeRate {
    pub sats_per_vb: MaestroSatsPerVb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroInscription {
    pub inscription_id: String,
    pub number: Option<i64>,
    pub content_type: Option<String>,
    pub utxo_txid: String,
    pub utxo_vout: u32,
    pub utxo_sat_offset: Option<u64>,
    pub satoshis: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroBrc20Balance {
    pub total: String,
    pub available: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroRune {
    pub id: String,
    pub spaced_name: String,
    #[serde(default)]
    pub divisibility: u8,
    pub symbol: Option<String>,
}

impl TryFrom<MaestroUtxo> for Utxo {
    type Error = LaserEyesError;

    fn try_from(u: MaestroUtxo) -> Result<Self> {
        let mut utxo = Utxo::new(u.txid, u.vout, u.satoshis.parse()?);
        utxo.script_pub_key = u.script_pubkey;
        utxo.confirmations = u.confirmations;
        utxo.has_inscription = Some(!u.inscriptions.is_empty());
        utxo.has_rune = Some(!u.runes.is_empty());
        Ok(utxo)
    }
}

impl TryFrom<MaestroTransaction> for TransactionInfo {
    type Error = LaserEyesError;

    fn try_from(tx: MaestroTransaction) -> Result<Self> {
        let outputs = tx
            .outputs
            .into_iter()
            .map(|o| -> Result<TxOutputInfo> {
                Ok(TxOutputInfo {
                    value: o.satoshis.parse()?,
                    script_pub_key: o.script_pubkey,
                    address: o.address,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TransactionInfo {
            txid: tx.txid,
            confirmed: tx.confirmations > 0,
            block_height: tx.height,
            outputs,
        })
    }
}

pub struct MaestroDataSource {
    http: Arc<dyn HttpClient>,
    api_key: String,
}

impl MaestroDataSource {
    pub fn new(http: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }

    fn base_url(network: NetworkType) -> Result<&'static str> {
        network
            .maestro_url()
            .ok_or_else(|| LaserEyesError::unsupported(MAESTRO, "this network"))
    }

    async fn get(&self, network: NetworkType, path: &str) -> Result<HttpResponse> {
        let url = format!("{}{}", Self::base_url(network)?, path);
        log::info!("[Maestro] Using direct HTTP GET to {}", url);
        self.http
            .send(HttpRequest::get(url).header("api-key", &self.api_key))
            .await
    }

    async fn get_data<T: DeserializeOwned>(&self, network: NetworkType, path: &str) -> Result<T> {
        let response = self.get(network, path).await?;
        let envelope: MaestroEnvelope<T> = response.json(path)?;
        Ok(envelope.data)
    }
}

const MAESTRO_CAPABILITIES: &[Capability] = &[
    Capability::Utxos,
    Capability::Balance,
    Capability::Transaction,
    Capability::Fees,
    Capability::Broadcast,
    Capability::Inscriptions,
    Capability::Runes,
    Capability::Brc20,
];

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DataSource for MaestroDataSource {
    fn name(&self) -> &str {
        MAESTRO
    }

    fn capabilities(&self) -> &[Capability] {
        MAESTRO_CAPABILITIES
    }

    async fn get_address_utxos(&self, network: NetworkType, address: &str) -> Result<Vec<Utxo>> {
        let utxos: Vec<MaestroUtxo> = self.get_data(network, &format!("/addresses/{address}/utxos")).await?;
        utxos.into_iter().map(Utxo::try_from).collect()
    }

    async fn get_balance(&self, network: NetworkType, address: &str) -> Result<u64> {
        let sats: String = self.get_data(network, &format!("/addresses/{address}/balance")).await?;
        Ok(sats.parse()?)
    }

    async fn get_transaction(&self, network: NetworkType, txid: &str) -> Result<Option<TransactionInfo>> {
        let path = format!("/transactions/{txid}");
        let response = self.get(network, &path).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        let envelope: MaestroEnvelope<MaestroTransaction> = response.json(&path)?;
        envelope.data.try_into().map(Some)
    }

    async fn get_recommended_fees(&self, network: NetworkType) -> Result<FeeEstimate> {
        let rates: Vec<MaestroFeeRate> = self.get_data(network, "/mempool/fee_rates").await?;
        let first = rates
            .first()
            .ok_or_else(|| LaserEyesError::Serialization("maestro returned no fee rates".to_string()))?;
        Ok(FeeEstimate {
            fast_fee: first.sats_per_vb.median.max(first.sats_per_vb.min),
            min_fee: first.sats_per_vb.min,
        })
    }

    async fn broadcast_transaction(&self, network: NetworkType, tx_hex: &str) -> Result<String> {
        let url = format!("{}/rpc/transaction/submit", Self::base_url(network)?);
        log::info!("[Maestro] Broadcasting transaction via {}", url);
        let request = HttpRequest::post(url, json!(tx_hex).to_string(), "application/json").header("api-key", &self.api_key);
        let response = self.http.send(request).await?;
        if !response.is_success() {
            return Err(LaserEyesError::BroadcastFailed(format!(
                "maestro returned HTTP {}: {}",
                response.status, response.body
            )));
        }
        let envelope: MaestroEnvelope<String> = response.json("transaction/submit")?;
        Ok(envelope.data)
    }

    async fn get_inscriptions(
        &self,
        network: NetworkType,
        address: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Inscription>> {
        let inscriptions: Vec<MaestroInscription> = self
            .get_data(network, &format!("/addresses/{address}/inscriptions?count={}", offset + limit))
            .await?;
        inscriptions
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|i| -> Result<Inscription> {
                Ok(Inscription {
                    id: i.inscription_id,
                    number: i.number,
                    output: format!("{}:{}", i.utxo_txid, i.utxo_vout),
                    content_type: i.content_type,
                    value: i.satoshis.as_deref().map(str::parse::<u64>).transpose()?,
                })
            })
            .collect()
    }

    async fn get_meta_balances(&self, network: NetworkType, address: &str, protocol: Protocol) -> Result<Vec<MetaBalance>> {
        match protocol {
            Protocol::Runes => {
                let balances: BTreeMap<String, String> =
                    self.get_data(network, &format!("/addresses/{address}/runes")).await?;
                Ok(balances
                    .into_iter()
                    .map(|(id, balance)| MetaBalance {
                        protocol: Protocol::Runes,
                        name: id.clone(),
                        id,
                        balance,
                        symbol: None,
                        divisibility: None,
                    })
                    .collect())
            }
            Protocol::Brc20 => {
                let balances: BTreeMap<String, MaestroBrc20Balance> =
                    self.get_data(network, &format!("/addresses/{address}/brc20")).await?;
                Ok(balances
                    .into_iter()
                    .map(|(tick, balance)| MetaBalance {
                        protocol: Protocol::Brc20,
                        id: tick.clone(),
                        name: tick,
                        balance: balance.available,
                        symbol: None,
                        divisibility: None,
                    })
                    .collect())
            }
            Protocol::Alkanes => Err(LaserEyesError::unsupported(MAESTRO, "alkanes")),
            Protocol::Btc => Err(LaserEyesError::unsupported(MAESTRO, "btc meta balances")),
        }
    }

    async fn get_rune_by_id(&self, network: NetworkType, rune_id: &str) -> Result<RuneInfo> {
        let path = format!("/assets/runes/{rune_id}");
        let response = self.get(network, &path).await?;
        if response.is_not_found() {
            return Err(LaserEyesError::AssetNotFound(format!("rune {rune_id}")));
        }
        let envelope: MaestroEnvelope<MaestroRune> = response.json(&path)?;
        let rune = envelope.data;
        Ok(RuneInfo {
            id: rune.id,
            name: rune.spaced_name,
            divisibility: rune.divisibility,
            symbol: rune.symbol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::http::MockHttpClient;

    #[tokio::test]
    async fn requests_carry_api_key_and_flag_assets() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| {
                req.url == "https://xbt-mainnet.gomaestro-api.org/v0/addresses/bc1pabc/utxos"
                    && req.headers.iter().any(|(k, v)| k == "api-key" && v == "secret")
            })
            .returning(|_| {
                Ok(HttpResponse::ok(
                    r#"{"data":[
                        {"txid":"aa","vout":0,"satoshis":"546","script_pubkey":"5120","confirmations":3,"inscriptions":[{"inscription_id":"x"}],"runes":[]},
                        {"txid":"bb","vout":1,"satoshis":"90000","script_pubkey":"5120","confirmations":0,"inscriptions":[],"runes":[]}
                    ],"last_updated":{}}"#,
                ))
            });
        let source = MaestroDataSource::new(Arc::new(http), "secret");
        let utxos = source.get_address_utxos(NetworkType::Mainnet, "bc1pabc").await.unwrap();
        assert_eq!(utxos.len(), 2);
        assert!(utxos[0].carries_asset());
        assert_eq!(utxos[1].value, 90_000);
        assert!(!utxos[1].carries_asset());
    }

    #[tokio::test]
    async fn unsupported_network_fails_without_request() {
        let http = MockHttpClient::new();
        let source = MaestroDataSource::new(Arc::new(http), "secret");
        let err = source.get_balance(NetworkType::Signet, "tb1q").await.unwrap_err();
        assert!(matches!(err, LaserEyesError::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn confirmations_drive_confirmed_flag() {
        let mut http = MockHttpClient::new();
        http.expect_send().returning(|_| {
            Ok(HttpResponse::ok(
                r#"{"data":{"txid":"cc","height":850000,"confirmations":2,"outputs":[{"satoshis":"1000","script_pubkey":"0014","address":"bc1q"}]}}"#,
            ))
        });
        let source = MaestroDataSource::new(Arc::new(http), "secret");
        let tx = source.get_transaction(NetworkType::Mainnet, "cc").await.unwrap().unwrap();
        assert!(tx.confirmed);
        assert_eq!(tx.outputs[0].value, 1000);
    }
}
