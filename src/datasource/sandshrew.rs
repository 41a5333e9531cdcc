//! Sandshrew JSON-RPC data source.
//!
//! Sandshrew fronts esplora, ord and the alkanes indexer behind one JSON-RPC
//! endpoint, which makes it the only provider here that can answer every
//! capability.

use super::esplora::{fee_estimate_from_targets, EsploraFeeEstimates, EsploraTransaction, EsploraUtxo};
use super::http::{json_rpc_call, HttpClient};
use super::{Capability, DataSource, SANDSHREW};
use crate::config::DEFAULT_SANDSHREW_API_KEY;
use crate::network::NetworkType;
use crate::types::{
    parse_u128, AlkaneBalance, AlkaneId, AlkaneOutpoint, FeeEstimate, Inscription, MetaBalance, Protocol, RuneInfo,
    RuneOutpoint, TransactionInfo, Utxo,
};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// JSON-RPC method names understood by Sandshrew.
pub struct SandshrewMethods;

impl SandshrewMethods {
    pub const ADDRESS_UTXO: &'static str = "esplora_address::utxo";
    pub const ADDRESS: &'static str = "esplora_address";
    pub const TX: &'static str = "esplora_tx";
    pub const FEE_ESTIMATES: &'static str = "esplora_fee-estimates";
    pub const SEND_RAW_TRANSACTION: &'static str = "sendrawtransaction";
    pub const ORD_ADDRESS: &'static str = "ord_address";
    pub const ORD_OUTPUT: &'static str = "ord_output";
    pub const ORD_INSCRIPTION: &'static str = "ord_inscription";
    pub const ORD_RUNE: &'static str = "ord_rune";
    pub const MULTICALL: &'static str = "sandshrew_multicall";
    pub const PROTORUNES_BY_ADDRESS: &'static str = "alkanes_protorunesbyaddress";
}

const MAX_CALLS_PER_MULTICALL: usize = 1000;
const ALKANES_PROTOCOL_TAG: &str = "1";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrdAddressInfo {
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub inscriptions: Vec<String>,
    /// `[spaced name, amount, symbol]` triples.
    #[serde(default)]
    pub runes_balances: Vec<(String, String, Option<String>)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdRuneEntry {
    pub spaced_rune: String,
    #[serde(default)]
    pub divisibility: u8,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdRuneResponse {
    pub id: String,
    pub entry: OrdRuneEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdInscriptionResponse {
    pub id: String,
    pub number: Option<i64>,
    pub content_type: Option<String>,
    pub satpoint: Option<String>,
    pub value: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProtoruneId {
    block: String,
    tx: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtoruneRune {
    id: ProtoruneId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProtoruneBalance {
    rune: ProtoruneRune,
    balance: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ProtoruneOutpointRef {
    txid: String,
    vout: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ProtoruneOutput {
    value: JsonValue,
    #[serde(default)]
    script: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ProtoruneOutpoint {
    #[serde(default)]
    runes: Vec<ProtoruneBalance>,
    outpoint: ProtoruneOutpointRef,
    output: ProtoruneOutput,
}

pub struct SandshrewDataSource {
    http: Arc<dyn HttpClient>,
    url: Option<String>,
    api_key: String,
}

impl SandshrewDataSource {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            url: None,
            api_key: DEFAULT_SANDSHREW_API_KEY.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    fn rpc_url(&self, network: NetworkType) -> String {
        let base = self.url.as_deref().unwrap_or_else(|| network.sandshrew_url());
        format!("{}/{}", base, self.api_key)
    }

    async fn call(&self, network: NetworkType, method: &str, params: JsonValue) -> Result<JsonValue> {
        json_rpc_call(self.http.as_ref(), &self.rpc_url(network), method, params).await
    }

    /// Runs `calls` through `sandshrew_multicall` in bounded batches and
    /// returns the per-call `result` values in order.
    async fn multicall(&self, network: NetworkType, calls: Vec<(&'static str, JsonValue)>) -> Result<Vec<JsonValue>> {
        let mut results = Vec::with_capacity(calls.len());
        for batch in calls.chunks(MAX_CALLS_PER_MULTICALL) {
            let payload: Vec<JsonValue> = batch.iter().map(|(m, p)| json!([m, p])).collect();
            let response = self.call(network, SandshrewMethods::MULTICALL, json!(payload)).await?;
            let entries = response
                .as_array()
                .ok_or_else(|| LaserEyesError::Serialization("multicall result is not an array".to_string()))?;
            results.extend(entries.iter().map(|e| e.get("result").cloned().unwrap_or(JsonValue::Null)));
        }
        Ok(results)
    }

    async fn ord_address(&self, network: NetworkType, address: &str) -> Result<OrdAddressInfo> {
        let result = self.call(network, SandshrewMethods::ORD_ADDRESS, json!([address])).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn protorunes_by_address(&self, network: NetworkType, address: &str) -> Result<Vec<ProtoruneOutpoint>> {
        let result = self
            .call(
                network,
                SandshrewMethods::PROTORUNES_BY_ADDRESS,
                json!([{ "address": address, "protocolTag": ALKANES_PROTOCOL_TAG }]),
            )
            .await?;
        let outpoints = result.get("outpoints").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(outpoints)?)
    }

    async fn esplora_utxos(&self, network: NetworkType, address: &str) -> Result<Vec<Utxo>> {
        let result = self.call(network, SandshrewMethods::ADDRESS_UTXO, json!([address])).await?;
        let utxos: Vec<EsploraUtxo> = serde_json::from_value(result)?;
        Ok(utxos.into_iter().map(Utxo::from).collect())
    }

    /// Sets the asset flags of `utxos` from ord and the alkanes indexer.
    /// Outputs ord has not indexed yet keep `None` for inscriptions and runes.
    async fn mark_asset_utxos(&self, network: NetworkType, address: &str, utxos: &mut [Utxo]) -> Result<()> {
        if utxos.is_empty() {
            return Ok(());
        }
        let calls = utxos
            .iter()
            .map(|u| (SandshrewMethods::ORD_OUTPUT, json!([format!("{}:{}", u.txid, u.vout)])))
            .collect::<Vec<_>>();
        let outputs = self.multicall(network, calls).await?;
        for (utxo, output) in utxos.iter_mut().zip(&outputs) {
            if output.is_null() {
                continue;
            }
            utxo.has_inscription = Some(output.get("inscriptions").is_some_and(non_empty));
            utxo.has_rune = Some(output.get("runes").is_some_and(non_empty));
        }

        match self.protorunes_by_address(network, address).await {
            Ok(holdings) => {
                for utxo in utxos.iter_mut() {
                    let held = holdings.iter().any(|h| {
                        h.outpoint.txid == utxo.txid
                            && h.outpoint.vout == utxo.vout
                            && h.runes.iter().any(|r| parse_u128(&r.balance).unwrap_or(0) > 0)
                    });
                    utxo.has_alkanes = Some(held);
                }
            }
            Err(e) => log::warn!("[Sandshrew] Alkanes lookup for {} failed, alkane flags unknown: {}", address, e),
        }
        Ok(())
    }
}

fn non_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
        _ => false,
    }
}

fn json_amount(value: &JsonValue) -> Option<u128> {
    match value {
        JsonValue::Number(n) => n.as_u64().map(u128::from),
        JsonValue::String(s) => parse_u128(s),
        _ => None,
    }
}

/// Looks up `rune_name` in an `ord_output` result. ord has returned the
/// rune map both as an object and as a list of `[name, entry]` pairs.
fn rune_amount_in_output(output: &JsonValue, rune_name: &str) -> Option<u128> {
    let runes = output.get("runes")?;
    let entry = match runes {
        JsonValue::Object(map) => map.get(rune_name).cloned(),
        JsonValue::Array(pairs) => pairs.iter().find_map(|pair| {
            let pair = pair.as_array()?;
            (pair.first()?.as_str()? == rune_name).then(|| pair.get(1).cloned()).flatten()
        }),
        _ => None,
    }?;
    json_amount(entry.get("amount")?)
}

const SANDSHREW_CAPABILITIES: &[Capability] = &[
    Capability::Utxos,
    Capability::Balance,
    Capability::Transaction,
    Capability::Fees,
    Capability::Broadcast,
    Capability::Inscriptions,
    Capability::Runes,
    Capability::Alkanes,
];

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DataSource for SandshrewDataSource {
    fn name(&self) -> &str {
        SANDSHREW
    }

    fn capabilities(&self) -> &[Capability] {
        SANDSHREW_CAPABILITIES
    }

    async fn get_address_utxos(&self, network: NetworkType, address: &str) -> Result<Vec<Utxo>> {
        log::info!("[Sandshrew] {} {}", SandshrewMethods::ADDRESS_UTXO, address);
        let mut utxos = self.esplora_utxos(network, address).await?;
        self.mark_asset_utxos(network, address, &mut utxos).await?;
        Ok(utxos)
    }

    async fn get_balance(&self, network: NetworkType, address: &str) -> Result<u64> {
        let utxos = self.esplora_utxos(network, address).await?;
        Ok(utxos.iter().map(|u| u.value).sum())
    }

    async fn get_transaction(&self, network: NetworkType, txid: &str) -> Result<Option<TransactionInfo>> {
        let result = match self.call(network, SandshrewMethods::TX, json!([txid])).await {
            Ok(result) => result,
            Err(LaserEyesError::Network(msg)) if msg.to_ascii_lowercase().contains("not found") => return Ok(None),
            Err(e) => return Err(e),
        };
        if result.is_null() {
            return Ok(None);
        }
        let tx: EsploraTransaction = serde_json::from_value(result)?;
        Ok(Some(tx.into()))
    }

    async fn get_recommended_fees(&self, network: NetworkType) -> Result<FeeEstimate> {
        let result = self.call(network, SandshrewMethods::FEE_ESTIMATES, json!([])).await?;
        let estimates: EsploraFeeEstimates = serde_json::from_value(result)?;
        fee_estimate_from_targets(&estimates)
    }

    async fn broadcast_transaction(&self, network: NetworkType, tx_hex: &str) -> Result<String> {
        log::info!("[Sandshrew] Broadcasting transaction");
        let result = self
            .call(network, SandshrewMethods::SEND_RAW_TRANSACTION, json!([tx_hex]))
            .await
            .map_err(|e| LaserEyesError::BroadcastFailed(format!("sandshrew: {e}")))?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LaserEyesError::BroadcastFailed(format!("sandshrew returned {result}")))
    }

    async fn get_inscriptions(
        &self,
        network: NetworkType,
        address: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Inscription>> {
        let info = self.ord_address(network, address).await?;
        let calls = info
            .inscriptions
            .iter()
            .skip(offset)
            .take(limit)
            .map(|id| (SandshrewMethods::ORD_INSCRIPTION, json!([id])))
            .collect::<Vec<_>>();
        let results = self.multicall(network, calls).await?;
        let mut inscriptions = Vec::with_capacity(results.len());
        for result in results {
            let info: OrdInscriptionResponse = serde_json::from_value(result)?;
            let output = info
                .satpoint
                .as_deref()
                .and_then(|sp| sp.rsplit_once(':').map(|(outpoint, _offset)| outpoint.to_string()))
                .unwrap_or_default();
            inscriptions.push(Inscription {
                id: info.id,
                number: info.number,
                output,
                content_type: info.content_type,
                value: info.value,
            });
        }
        Ok(inscriptions)
    }

    async fn get_meta_balances(&self, network: NetworkType, address: &str, protocol: Protocol) -> Result<Vec<MetaBalance>> {
        match protocol {
            Protocol::Runes => {
                let info = self.ord_address(network, address).await?;
                Ok(info
                    .runes_balances
                    .into_iter()
                    .map(|(name, balance, symbol)| MetaBalance {
                        protocol: Protocol::Runes,
                        id: name.clone(),
                        name,
                        balance,
                        symbol,
                        divisibility: None,
                    })
                    .collect())
            }
            Protocol::Alkanes => {
                let mut totals: Vec<MetaBalance> = Vec::new();
                for outpoint in self.get_alkanes_by_address(network, address).await? {
                    for alkane in outpoint.alkanes {
                        let id = alkane.id.to_string();
                        match totals.iter_mut().find(|b| b.id == id) {
                            Some(existing) => {
                                let sum = parse_u128(&existing.balance).unwrap_or(0) + alkane.amount;
                                existing.balance = sum.to_string();
                            }
                            None => totals.push(MetaBalance {
                                protocol: Protocol::Alkanes,
                                name: alkane.name.clone().unwrap_or_else(|| id.clone()),
                                id,
                                balance: alkane.amount.to_string(),
                                symbol: alkane.symbol.clone(),
                                divisibility: None,
                            }),
                        }
                    }
                }
                Ok(totals)
            }
            Protocol::Brc20 => Err(LaserEyesError::unsupported(SANDSHREW, "brc-20 balances")),
            Protocol::Btc => Err(LaserEyesError::unsupported(SANDSHREW, "btc meta balances")),
        }
    }

    async fn get_rune_by_id(&self, network: NetworkType, rune_id: &str) -> Result<RuneInfo> {
        let result = self.call(network, SandshrewMethods::ORD_RUNE, json!([rune_id])).await?;
        if result.is_null() {
            return Err(LaserEyesError::AssetNotFound(format!("rune {rune_id}")));
        }
        let rune: OrdRuneResponse = serde_json::from_value(result)?;
        Ok(RuneInfo {
            id: rune.id,
            name: rune.entry.spaced_rune,
            divisibility: rune.entry.divisibility,
            symbol: rune.entry.symbol,
        })
    }

    async fn get_rune_outpoints(&self, network: NetworkType, address: &str, rune_id: &str) -> Result<Vec<RuneOutpoint>> {
        let info = self.ord_address(network, address).await?;
        let rune = self.get_rune_by_id(network, rune_id).await?;
        let calls = info
            .outputs
            .iter()
            .map(|outpoint| (SandshrewMethods::ORD_OUTPUT, json!([outpoint])))
            .collect::<Vec<_>>();
        let results = self.multicall(network, calls).await?;

        let mut outpoints = Vec::new();
        for (outpoint, output) in info.outputs.iter().zip(results) {
            let Some(balance) = rune_amount_in_output(&output, &rune.name) else {
                continue;
            };
            let Some((txid, vout)) = outpoint.split_once(':') else {
                return Err(LaserEyesError::Serialization(format!("malformed outpoint {outpoint}")));
            };
            outpoints.push(RuneOutpoint {
                txid: txid.to_string(),
                vout: vout.parse()?,
                value: output.get("value").and_then(JsonValue::as_u64).unwrap_or(0),
                script_pub_key: String::new(),
                balance,
            });
        }
        log::debug!("[Sandshrew] {} outpoints hold rune {}", outpoints.len(), rune.name);
        Ok(outpoints)
    }

    async fn get_alkanes_by_address(&self, network: NetworkType, address: &str) -> Result<Vec<AlkaneOutpoint>> {
        let raw = self.protorunes_by_address(network, address).await?;
        let mut outpoints = Vec::with_capacity(raw.len());
        for entry in raw {
            let mut alkanes = Vec::with_capacity(entry.runes.len());
            for rune in entry.runes {
                let id = AlkaneId {
                    block: parse_u128(&rune.rune.id.block)
                        .ok_or_else(|| LaserEyesError::Serialization(format!("bad alkane block {}", rune.rune.id.block)))?,
                    tx: parse_u128(&rune.rune.id.tx)
                        .ok_or_else(|| LaserEyesError::Serialization(format!("bad alkane tx {}", rune.rune.id.tx)))?,
                };
                alkanes.push(AlkaneBalance {
                    id,
                    name: rune.rune.name,
                    symbol: rune.rune.symbol,
                    amount: parse_u128(&rune.balance).unwrap_or(0),
                });
            }
            outpoints.push(AlkaneOutpoint {
                txid: entry.outpoint.txid,
                vout: entry.outpoint.vout,
                value: json_amount(&entry.output.value).unwrap_or(0) as u64,
                script_pub_key: entry.output.script,
                alkanes,
            });
        }
        Ok(outpoints)
    }
}
