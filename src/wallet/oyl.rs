//! OYL Wallet.

use super::unisat::{UnisatBalance, UnisatInscriptionPage};
use super::{check_protocol, invoke, require_str, InjectedWallet, ProviderId, WalletAccount, WalletAdapter};
use crate::network::NetworkType;
use crate::psbt::{EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::{Inscription, SignMessageProtocol};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OylAddress {
    address: String,
    public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OylAddresses {
    taproot: Option<OylAddress>,
    native_segwit: Option<OylAddress>,
}

#[derive(Debug, Deserialize)]
struct OylSigned {
    psbt: String,
    #[serde(default)]
    txid: Option<String>,
}

pub struct OylAdapter {
    bridge: Arc<dyn InjectedWallet>,
}

impl OylAdapter {
    pub fn new(bridge: Arc<dyn InjectedWallet>) -> Self {
        Self { bridge }
    }

    async fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
        invoke(ProviderId::Oyl, self.bridge.as_ref(), method, params).await
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl WalletAdapter for OylAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Oyl
    }

    fn supports_native_send(&self) -> bool {
        false
    }

    fn sign_message_protocols(&self) -> &'static [SignMessageProtocol] {
        &[SignMessageProtocol::Ecdsa, SignMessageProtocol::Bip322]
    }

    async fn connect(&self, network: NetworkType) -> Result<WalletAccount> {
        if !network.is_mainnet_encoding() {
            return Err(LaserEyesError::unsupported(ProviderId::Oyl.as_str(), "non-mainnet networks"));
        }
        let addresses: OylAddresses = serde_json::from_value(self.call("getAddresses", json!([])).await?)?;
        let (Some(taproot), Some(segwit)) = (addresses.taproot, addresses.native_segwit) else {
            return Err(LaserEyesError::Wallet("oyl returned no taproot and segwit accounts".to_string()));
        };
        Ok(WalletAccount {
            address: taproot.address,
            public_key: taproot.public_key,
            payment_address: segwit.address,
            payment_public_key: segwit.public_key,
        })
    }

    async fn get_public_key(&self, _network: NetworkType) -> Result<String> {
        let value = self.call("getPublicKey", json!([])).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LaserEyesError::Wallet(format!("oyl getPublicKey returned {value}")))
    }

    async fn get_balance(&self, _account: &WalletAccount) -> Result<u64> {
        let balance: UnisatBalance = serde_json::from_value(self.call("getBalance", json!([])).await?)?;
        Ok(balance.total)
    }

    async fn get_inscriptions(&self, _account: &WalletAccount, offset: usize, limit: usize) -> Result<Vec<Inscription>> {
        let response = self.call("getInscriptions", json!([offset, limit])).await?;
        let page = if response.is_array() {
            json!({ "list": response })
        } else {
            response
        };
        let page: UnisatInscriptionPage = serde_json::from_value(page)?;
        Ok(page.into_inscriptions())
    }

    async fn sign_message(&self, account: &WalletAccount, message: &str, protocol: SignMessageProtocol) -> Result<String> {
        check_protocol(self.id(), self.sign_message_protocols(), protocol)?;
        let response = self
            .call(
                "signMessage",
                json!([{ "address": account.payment_address, "message": message, "protocol": protocol.to_string() }]),
            )
            .await?;
        require_str(ProviderId::Oyl, &response, "signature")
    }

    async fn sign_psbt(&self, _account: &WalletAccount, request: &SignPsbtRequest) -> Result<SignResult> {
        let params = json!([{
            "psbt": request.psbt.hex,
            "finalize": request.finalize,
            "broadcast": request.broadcast,
        }]);
        let signed: OylSigned = serde_json::from_value(self.call("signPsbt", params).await?)?;
        let psbt = EncodedPsbt::parse(&signed.psbt)?;
        Ok(match signed.txid {
            Some(txid) => SignResult::Broadcast { txid, psbt: Some(psbt) },
            None => SignResult::Signed { psbt },
        })
    }

    async fn push_psbt(&self, psbt_hex: &str) -> Result<String> {
        let response = self.call("pushPsbt", json!([{ "psbt": psbt_hex }])).await?;
        require_str(ProviderId::Oyl, &response, "txid")
    }
}
