//! OKX Wallet.
//!
//! OKX exposes one UniSat-like namespace per network, `okxwallet.bitcoin`
//! for mainnet and `okxwallet.bitcoinTestnet` for testnet, and cannot switch
//! between them at runtime.

use super::unisat::{UnisatBalance, UnisatInscriptionPage};
use super::{check_protocol, invoke, require_str, InjectedWallet, ProviderId, WalletAccount, WalletAdapter};
use crate::network::NetworkType;
use crate::psbt::{EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::{Inscription, SignMessageProtocol};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

pub struct OkxAdapter {
    bridge: Arc<dyn InjectedWallet>,
}

impl OkxAdapter {
    pub fn new(bridge: Arc<dyn InjectedWallet>) -> Self {
        Self { bridge }
    }

    fn namespace(network: NetworkType) -> &'static str {
        if network.is_mainnet_encoding() {
            "bitcoin"
        } else {
            "bitcoinTestnet"
        }
    }

    /// Network namespace of an already connected account.
    fn account_namespace(account: &WalletAccount) -> &'static str {
        if NetworkType::Mainnet.accepts_address(&account.address) {
            "bitcoin"
        } else {
            "bitcoinTestnet"
        }
    }

    async fn call(&self, namespace: &str, method: &str, params: JsonValue) -> Result<JsonValue> {
        invoke(ProviderId::Okx, self.bridge.as_ref(), &format!("{namespace}.{method}"), params).await
    }

    async fn call_str(&self, namespace: &str, method: &str, params: JsonValue) -> Result<String> {
        let value = self.call(namespace, method, params).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LaserEyesError::Wallet(format!("okx {method} returned {value}")))
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl WalletAdapter for OkxAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Okx
    }

    fn sign_message_protocols(&self) -> &'static [SignMessageProtocol] {
        &[SignMessageProtocol::Ecdsa, SignMessageProtocol::Bip322]
    }

    async fn connect(&self, network: NetworkType) -> Result<WalletAccount> {
        let response = self.call(Self::namespace(network), "connect", json!([])).await?;
        let address = require_str(ProviderId::Okx, &response, "address")?;
        let public_key = require_str(ProviderId::Okx, &response, "publicKey")?;
        if !network.accepts_address(&address) {
            return Err(LaserEyesError::Wallet(format!(
                "okx returned {address}, which is not a {network} address"
            )));
        }
        Ok(WalletAccount::single(address, public_key))
    }

    async fn get_balance(&self, account: &WalletAccount) -> Result<u64> {
        let balance: UnisatBalance =
            serde_json::from_value(self.call(Self::account_namespace(account), "getBalance", json!([])).await?)?;
        Ok(balance.total)
    }

    async fn get_inscriptions(&self, account: &WalletAccount, offset: usize, limit: usize) -> Result<Vec<Inscription>> {
        let page: UnisatInscriptionPage = serde_json::from_value(
            self.call(Self::account_namespace(account), "getInscriptions", json!([offset, limit]))
                .await?,
        )?;
        Ok(page.into_inscriptions())
    }

    async fn send_btc(&self, account: &WalletAccount, to: &str, amount: u64) -> Result<String> {
        self.call_str(Self::account_namespace(account), "sendBitcoin", json!([to, amount]))
            .await
    }

    async fn sign_message(&self, account: &WalletAccount, message: &str, protocol: SignMessageProtocol) -> Result<String> {
        check_protocol(self.id(), self.sign_message_protocols(), protocol)?;
        self.call_str(
            Self::account_namespace(account),
            "signMessage",
            json!([message, protocol.to_string()]),
        )
        .await
    }

    async fn sign_psbt(&self, account: &WalletAccount, request: &SignPsbtRequest) -> Result<SignResult> {
        let namespace = Self::account_namespace(account);
        let options = json!({ "autoFinalized": request.finalize, "toSignInputs": request.inputs_to_sign });
        let signed = self
            .call_str(namespace, "signPsbt", json!([request.psbt.hex, options]))
            .await?;
        let psbt = EncodedPsbt::from_hex(&signed)?;
        if request.finalize && request.broadcast {
            let txid = self.call_str(namespace, "pushPsbt", json!([psbt.hex])).await?;
            return Ok(SignResult::Broadcast { txid, psbt: Some(psbt) });
        }
        Ok(SignResult::Signed { psbt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_account, MockWallet};

    #[tokio::test]
    async fn testnet_uses_testnet_namespace() {
        let account = test_account(NetworkType::Testnet);
        let wallet = MockWallet::new().respond(
            "bitcoinTestnet.connect",
            json!({ "address": account.address, "publicKey": account.public_key }),
        );
        let adapter = OkxAdapter::new(Arc::new(wallet));
        let connected = adapter.connect(NetworkType::Testnet).await.unwrap();
        assert_eq!(connected.address, account.address);
    }

    #[tokio::test]
    async fn network_switch_is_unsupported() {
        let adapter = OkxAdapter::new(Arc::new(MockWallet::new()));
        let err = adapter.switch_network(NetworkType::Testnet).await.unwrap_err();
        assert!(matches!(err, LaserEyesError::NetworkSwitchUnsupported(ProviderId::Okx)));
    }
}
