//! UniSat and Wizz.
//!
//! Wizz ships a fork of the UniSat provider API; the two differ only in how
//! networks are named and switched.

use super::{check_protocol, invoke, InjectedWallet, ProviderId, WalletAccount, WalletAdapter};
use crate::network::NetworkType;
use crate::psbt::{EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::{Inscription, SignMessageProtocol};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Unisat,
    Wizz,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnisatBalance {
    pub(crate) total: u64,
}

/// Inscription listing shape shared by UniSat-style providers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UnisatInscription {
    inscription_id: String,
    inscription_number: Option<i64>,
    output: String,
    content_type: Option<String>,
    output_value: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnisatInscriptionPage {
    #[serde(default)]
    list: Vec<UnisatInscription>,
}

impl UnisatInscriptionPage {
    pub(crate) fn into_inscriptions(self) -> Vec<Inscription> {
        self.list
            .into_iter()
            .map(|i| Inscription {
                id: i.inscription_id,
                number: i.inscription_number,
                output: i.output,
                content_type: i.content_type,
                value: i.output_value,
            })
            .collect()
    }
}

pub struct UnisatAdapter {
    bridge: Arc<dyn InjectedWallet>,
    flavor: Flavor,
}

impl UnisatAdapter {
    pub fn unisat(bridge: Arc<dyn InjectedWallet>) -> Self {
        Self {
            bridge,
            flavor: Flavor::Unisat,
        }
    }

    pub fn wizz(bridge: Arc<dyn InjectedWallet>) -> Self {
        Self {
            bridge,
            flavor: Flavor::Wizz,
        }
    }

    async fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
        invoke(self.id(), self.bridge.as_ref(), method, params).await
    }

    async fn call_str(&self, method: &str, params: JsonValue) -> Result<String> {
        let value = self.call(method, params).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LaserEyesError::Wallet(format!("{} {method} returned {value}", self.id())))
    }

    fn wallet_network_name(&self, network: NetworkType) -> &'static str {
        match self.flavor {
            Flavor::Unisat => match network {
                NetworkType::Mainnet | NetworkType::Regtest => "BITCOIN_MAINNET",
                NetworkType::Testnet => "BITCOIN_TESTNET",
                NetworkType::Testnet4 => "BITCOIN_TESTNET4",
                NetworkType::Signet => "BITCOIN_SIGNET",
                NetworkType::FractalMainnet => "FRACTAL_BITCOIN_MAINNET",
                NetworkType::FractalTestnet => "FRACTAL_BITCOIN_TESTNET",
            },
            Flavor::Wizz => match network {
                NetworkType::Mainnet | NetworkType::FractalMainnet | NetworkType::Regtest => "livenet",
                NetworkType::Testnet | NetworkType::FractalTestnet => "testnet",
                NetworkType::Testnet4 => "testnet4",
                NetworkType::Signet => "signet",
            },
        }
    }

    fn network_from_wallet(&self, name: &str) -> NetworkType {
        match name {
            "BITCOIN_TESTNET" | "testnet" | "fractal_testnet" => NetworkType::Testnet,
            "BITCOIN_TESTNET4" | "testnet4" => NetworkType::Testnet4,
            "BITCOIN_SIGNET" | "signet" => NetworkType::Signet,
            "FRACTAL_BITCOIN_MAINNET" => NetworkType::FractalMainnet,
            "FRACTAL_BITCOIN_TESTNET" => NetworkType::FractalTestnet,
            _ => NetworkType::Mainnet,
        }
    }

    async fn request_first_account(&self) -> Result<String> {
        let accounts = self.call("requestAccounts", json!([])).await?;
        accounts
            .as_array()
            .and_then(|a| a.first())
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| LaserEyesError::Wallet(format!("{} returned no accounts", self.id())))
    }

    fn sign_options(request: &SignPsbtRequest) -> JsonValue {
        let to_sign: Vec<JsonValue> = request
            .inputs_to_sign
            .iter()
            .map(|i| json!({ "index": i.index, "address": i.address }))
            .collect();
        if to_sign.is_empty() {
            json!({ "autoFinalized": request.finalize })
        } else {
            json!({ "autoFinalized": request.finalize, "toSignInputs": to_sign })
        }
    }

    async fn finish_signing(&self, request: &SignPsbtRequest, signed_hex: &str) -> Result<SignResult> {
        let psbt = EncodedPsbt::from_hex(signed_hex)?;
        if request.finalize && request.broadcast {
            let txid = self.push_psbt(&psbt.hex).await?;
            return Ok(SignResult::Broadcast { txid, psbt: Some(psbt) });
        }
        Ok(SignResult::Signed { psbt })
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl WalletAdapter for UnisatAdapter {
    fn id(&self) -> ProviderId {
        match self.flavor {
            Flavor::Unisat => ProviderId::Unisat,
            Flavor::Wizz => ProviderId::Wizz,
        }
    }

    fn supports_network_switch(&self) -> bool {
        true
    }

    fn sign_message_protocols(&self) -> &'static [SignMessageProtocol] {
        &[SignMessageProtocol::Ecdsa, SignMessageProtocol::Bip322]
    }

    async fn connect(&self, network: NetworkType) -> Result<WalletAccount> {
        let mut address = self.request_first_account().await?;
        if self.get_network(network).await? != network {
            log::info!("[{}Wallet] Wallet is on another network, switching to {}", self.id(), network);
            self.switch_network(network).await?;
            address = self.request_first_account().await?;
        }
        let public_key = self.call_str("getPublicKey", json!([])).await?;
        Ok(WalletAccount::single(address, public_key))
    }

    async fn get_network(&self, current: NetworkType) -> Result<NetworkType> {
        let name = match self.flavor {
            Flavor::Unisat => {
                let chain = self.call("getChain", json!([])).await?;
                match chain.get("enum").and_then(JsonValue::as_str) {
                    Some(name) => name.to_string(),
                    None => return Ok(current),
                }
            }
            Flavor::Wizz => self.call_str("getNetwork", json!([])).await?,
        };
        // regtest and fractal share a chain name with another network here
        if name == self.wallet_network_name(current) {
            return Ok(current);
        }
        Ok(self.network_from_wallet(&name))
    }

    async fn switch_network(&self, network: NetworkType) -> Result<()> {
        let name = self.wallet_network_name(network);
        match self.flavor {
            Flavor::Unisat => self.call("switchChain", json!([name])).await?,
            Flavor::Wizz => self.call("switchNetwork", json!([name])).await?,
        };
        Ok(())
    }

    async fn request_accounts(&self, _network: NetworkType) -> Result<Vec<String>> {
        let accounts = self.call("requestAccounts", json!([])).await?;
        Ok(serde_json::from_value(accounts)?)
    }

    async fn get_public_key(&self, _network: NetworkType) -> Result<String> {
        self.call_str("getPublicKey", json!([])).await
    }

    async fn get_balance(&self, _account: &WalletAccount) -> Result<u64> {
        let balance: UnisatBalance = serde_json::from_value(self.call("getBalance", json!([])).await?)?;
        Ok(balance.total)
    }

    async fn get_inscriptions(&self, _account: &WalletAccount, offset: usize, limit: usize) -> Result<Vec<Inscription>> {
        let page: UnisatInscriptionPage =
            serde_json::from_value(self.call("getInscriptions", json!([offset, limit])).await?)?;
        Ok(page.into_inscriptions())
    }

    async fn send_btc(&self, _account: &WalletAccount, to: &str, amount: u64) -> Result<String> {
        self.call_str("sendBitcoin", json!([to, amount])).await
    }

    async fn sign_message(&self, _account: &WalletAccount, message: &str, protocol: SignMessageProtocol) -> Result<String> {
        check_protocol(self.id(), self.sign_message_protocols(), protocol)?;
        self.call_str("signMessage", json!([message, protocol.to_string()])).await
    }

    async fn sign_psbt(&self, _account: &WalletAccount, request: &SignPsbtRequest) -> Result<SignResult> {
        let signed = self
            .call_str("signPsbt", json!([request.psbt.hex, Self::sign_options(request)]))
            .await?;
        self.finish_signing(request, &signed).await
    }

    async fn sign_psbts(&self, _account: &WalletAccount, requests: &[SignPsbtRequest]) -> Result<Vec<SignResult>> {
        let hexes: Vec<&str> = requests.iter().map(|r| r.psbt.hex.as_str()).collect();
        let options: Vec<JsonValue> = requests.iter().map(Self::sign_options).collect();
        let signed: Vec<String> = serde_json::from_value(self.call("signPsbts", json!([hexes, options])).await?)?;
        if signed.len() != requests.len() {
            return Err(LaserEyesError::Wallet(format!(
                "{} signed {} of {} PSBTs",
                self.id(),
                signed.len(),
                requests.len()
            )));
        }
        let mut results = Vec::with_capacity(signed.len());
        for (request, hex) in requests.iter().zip(signed) {
            results.push(self.finish_signing(request, &hex).await?);
        }
        Ok(results)
    }

    async fn push_psbt(&self, psbt_hex: &str) -> Result<String> {
        self.call_str("pushPsbt", json!([psbt_hex])).await
    }
}
