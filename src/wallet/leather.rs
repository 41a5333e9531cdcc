//! Leather.
//!
//! Leather signs hex PSBTs but never finalizes or broadcasts them, so both
//! happen on our side. Networks are chosen in the wallet UI only.

use super::{
    account_network, check_protocol, invoke, require_str, unwrap_rpc_envelope, InjectedWallet, ProviderId,
    WalletAccount, WalletAdapter,
};
use crate::network::NetworkType;
use crate::psbt::{finalize_signed_inputs, EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::SignMessageProtocol;
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

const P2TR: &str = "p2tr";
const P2WPKH: &str = "p2wpkh";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeatherAddress {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    address: String,
    #[serde(default)]
    public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeatherAddresses {
    addresses: Vec<LeatherAddress>,
}

pub struct LeatherAdapter {
    bridge: Arc<dyn InjectedWallet>,
}

impl LeatherAdapter {
    pub fn new(bridge: Arc<dyn InjectedWallet>) -> Self {
        Self { bridge }
    }

    async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
        let response = invoke(ProviderId::Leather, self.bridge.as_ref(), method, params).await?;
        unwrap_rpc_envelope(ProviderId::Leather, method, response)
    }

    async fn addresses(&self) -> Result<Vec<LeatherAddress>> {
        let response: LeatherAddresses = serde_json::from_value(self.request("getAddresses", json!({})).await?)?;
        Ok(response.addresses)
    }

    fn wallet_network_name(network: NetworkType) -> &'static str {
        if network.is_mainnet_encoding() {
            "mainnet"
        } else {
            "testnet"
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl WalletAdapter for LeatherAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Leather
    }

    fn sign_message_protocols(&self) -> &'static [SignMessageProtocol] {
        &[SignMessageProtocol::Bip322]
    }

    async fn connect(&self, network: NetworkType) -> Result<WalletAccount> {
        let addresses = self.addresses().await?;
        let by_type = |kind: &str| {
            addresses
                .iter()
                .find(|a| a.kind.as_deref() == Some(kind) && a.public_key.is_some())
        };
        let (Some(taproot), Some(segwit)) = (by_type(P2TR), by_type(P2WPKH)) else {
            return Err(LaserEyesError::Wallet("leather returned no taproot and segwit accounts".to_string()));
        };
        if !network.accepts_address(&taproot.address) {
            return Err(LaserEyesError::Wallet(format!(
                "leather is set to another network; switch to {network} in the wallet settings"
            )));
        }
        Ok(WalletAccount {
            address: taproot.address.clone(),
            public_key: taproot.public_key.clone().unwrap_or_default(),
            payment_address: segwit.address.clone(),
            payment_public_key: segwit.public_key.clone().unwrap_or_default(),
        })
    }

    async fn request_accounts(&self, _network: NetworkType) -> Result<Vec<String>> {
        Ok(self.addresses().await?.into_iter().map(|a| a.address).collect())
    }

    async fn send_btc(&self, _account: &WalletAccount, to: &str, amount: u64) -> Result<String> {
        let result = self
            .request("sendTransfer", json!({ "recipients": [{ "address": to, "amount": amount.to_string() }] }))
            .await?;
        require_str(ProviderId::Leather, &result, "txid")
    }

    async fn sign_message(&self, _account: &WalletAccount, message: &str, protocol: SignMessageProtocol) -> Result<String> {
        check_protocol(self.id(), self.sign_message_protocols(), protocol)?;
        let result = self
            .request("signMessage", json!({ "message": message, "paymentType": P2WPKH }))
            .await?;
        require_str(ProviderId::Leather, &result, "signature")
    }

    async fn sign_psbt(&self, account: &WalletAccount, request: &SignPsbtRequest) -> Result<SignResult> {
        let params = json!({
            "hex": request.psbt.hex,
            "broadcast": false,
            "network": Self::wallet_network_name(account_network(account)),
        });
        let result = self.request("signPsbt", params).await?;
        let signed = require_str(ProviderId::Leather, &result, "hex")?;
        let mut psbt = EncodedPsbt::from_hex(&signed)?.to_psbt()?;
        if request.finalize {
            finalize_signed_inputs(&mut psbt)?;
        }
        Ok(SignResult::Signed {
            psbt: EncodedPsbt::from_psbt(&psbt),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_account, test_psbt, MockWallet};

    #[tokio::test]
    async fn connect_maps_address_types() {
        let account = test_account(NetworkType::Mainnet);
        let wallet = MockWallet::new().respond(
            "getAddresses",
            json!({ "jsonrpc": "2.0", "result": { "addresses": [
                { "symbol": "BTC", "type": "p2wpkh", "address": account.payment_address, "publicKey": account.payment_public_key },
                { "symbol": "BTC", "type": "p2tr", "address": account.address, "publicKey": account.public_key },
                { "symbol": "STX", "address": "SP000000000000000000002Q6VF78" },
            ]}}),
        );
        let adapter = LeatherAdapter::new(Arc::new(wallet));
        assert_eq!(adapter.connect(NetworkType::Mainnet).await.unwrap(), account);

        let err = adapter.connect(NetworkType::Testnet).await.unwrap_err();
        assert!(err.to_string().contains("switch to testnet"));
    }

    #[tokio::test]
    async fn leather_never_broadcasts_itself() {
        let psbt = test_psbt();
        let wallet = MockWallet::new().respond("signPsbt", json!({ "result": { "hex": psbt.hex } }));
        let adapter = LeatherAdapter::new(Arc::new(wallet.clone()));
        let account = test_account(NetworkType::Testnet);

        let result = adapter
            .sign_psbt(&account, &SignPsbtRequest::new(psbt).broadcast(true))
            .await
            .unwrap();
        assert!(matches!(result, SignResult::Signed { .. }));
        let params = wallet.params_of("signPsbt").unwrap();
        assert_eq!(params["broadcast"], false);
        assert_eq!(params["network"], "testnet");
    }

    #[tokio::test]
    async fn only_bip322_messages() {
        let adapter = LeatherAdapter::new(Arc::new(MockWallet::new()));
        let account = test_account(NetworkType::Mainnet);
        let err = adapter
            .sign_message(&account, "gm", SignMessageProtocol::Ecdsa)
            .await
            .unwrap_err();
        assert!(matches!(err, LaserEyesError::UnsupportedProtocol { .. }));
    }
}
