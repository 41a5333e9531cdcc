//! Xverse, and the sats-connect request protocol it shares with Orange and
//! Magic Eden.
//!
//! sats-connect wallets take named parameters and answer with a
//! `{status, result}` or `{status, error}` envelope. They hand out separate
//! ordinals (taproot) and payment (segwit) addresses and cannot switch
//! networks on request.

use super::{
    account_network, check_protocol, invoke, require_str, signing_indexes, unwrap_rpc_envelope, InjectedWallet,
    ProviderId, WalletAccount, WalletAdapter,
};
use crate::network::NetworkType;
use crate::psbt::{finalize_signed_inputs, EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::SignMessageProtocol;
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;

/// How one sats-connect wallet deviates from the common protocol.
#[derive(Debug, Clone, Copy)]
pub struct SatsConnectProfile {
    pub provider: ProviderId,
    pub protocols: &'static [SignMessageProtocol],
    /// Refuses to connect on anything but mainnet.
    pub mainnet_only: bool,
    /// Returns signed but unfinalized PSBTs, leaving finalization to us.
    pub finalize_locally: bool,
    pub network_name: fn(NetworkType) -> &'static str,
}

fn xverse_network_name(network: NetworkType) -> &'static str {
    match network {
        NetworkType::Testnet | NetworkType::Testnet4 => "Testnet",
        NetworkType::Signet => "Signet",
        NetworkType::Regtest => "Regtest",
        NetworkType::Mainnet | NetworkType::FractalMainnet | NetworkType::FractalTestnet => "Mainnet",
    }
}

pub const XVERSE: SatsConnectProfile = SatsConnectProfile {
    provider: ProviderId::Xverse,
    protocols: &[SignMessageProtocol::Ecdsa, SignMessageProtocol::Bip322],
    mainnet_only: false,
    finalize_locally: false,
    network_name: xverse_network_name,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SatsConnectAddress {
    address: String,
    public_key: String,
    #[serde(default)]
    purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SatsConnectAddresses {
    addresses: Vec<SatsConnectAddress>,
}

#[derive(Debug, Deserialize)]
struct SatsConnectSigned {
    psbt: String,
    #[serde(default)]
    txid: Option<String>,
}

pub struct SatsConnectAdapter {
    bridge: Arc<dyn InjectedWallet>,
    profile: SatsConnectProfile,
}

pub fn xverse(bridge: Arc<dyn InjectedWallet>) -> SatsConnectAdapter {
    SatsConnectAdapter::new(bridge, XVERSE)
}

impl SatsConnectAdapter {
    pub fn new(bridge: Arc<dyn InjectedWallet>, profile: SatsConnectProfile) -> Self {
        Self { bridge, profile }
    }

    pub fn profile(&self) -> &SatsConnectProfile {
        &self.profile
    }

    async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
        let response = invoke(self.profile.provider, self.bridge.as_ref(), method, params).await?;
        unwrap_rpc_envelope(self.profile.provider, method, response)
    }

    /// Builds the `signInputs` map. Explicit inputs win over the ones
    /// inferred from the PSBT's witness UTXOs.
    fn sign_inputs(request: &SignPsbtRequest, account: &WalletAccount) -> Result<JsonValue> {
        let mut map = Map::new();
        if request.inputs_to_sign.is_empty() {
            let psbt = request.psbt.to_psbt()?;
            for (address, indexes) in signing_indexes(&psbt, account_network(account), account) {
                map.insert(address, json!(indexes));
            }
        } else {
            for input in &request.inputs_to_sign {
                let entry = map.entry(input.address.clone()).or_insert_with(|| json!([]));
                if let Some(indexes) = entry.as_array_mut() {
                    indexes.push(json!(input.index));
                }
            }
        }
        Ok(JsonValue::Object(map))
    }

    fn protocol_name(protocol: SignMessageProtocol) -> &'static str {
        match protocol {
            SignMessageProtocol::Ecdsa => "ECDSA",
            SignMessageProtocol::Bip322 => "BIP322",
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl WalletAdapter for SatsConnectAdapter {
    fn id(&self) -> ProviderId {
        self.profile.provider
    }

    fn sign_message_protocols(&self) -> &'static [SignMessageProtocol] {
        self.profile.protocols
    }

    async fn connect(&self, network: NetworkType) -> Result<WalletAccount> {
        if self.profile.mainnet_only && !network.is_mainnet_encoding() {
            return Err(LaserEyesError::unsupported(self.id().as_str(), "non-mainnet networks"));
        }
        let params = json!({
            "purposes": ["ordinals", "payment"],
            "message": "Address for receiving Ordinals and payments",
            "network": { "type": (self.profile.network_name)(network) },
        });
        let response: SatsConnectAddresses = serde_json::from_value(self.request("getAddresses", params).await?)?;

        let find = |purpose: &str| {
            response
                .addresses
                .iter()
                .find(|a| a.purpose.as_deref() == Some(purpose))
        };
        let (ordinals, payment) = match (find("ordinals"), find("payment")) {
            (Some(ordinals), Some(payment)) => (ordinals, payment),
            _ => match response.addresses.as_slice() {
                [ordinals, payment, ..] => (ordinals, payment),
                _ => {
                    return Err(LaserEyesError::Wallet(format!(
                        "{} did not return ordinals and payment addresses",
                        self.id()
                    )))
                }
            },
        };
        Ok(WalletAccount {
            address: ordinals.address.clone(),
            public_key: ordinals.public_key.clone(),
            payment_address: payment.address.clone(),
            payment_public_key: payment.public_key.clone(),
        })
    }

    async fn send_btc(&self, _account: &WalletAccount, to: &str, amount: u64) -> Result<String> {
        let result = self
            .request("sendTransfer", json!({ "recipients": [{ "address": to, "amount": amount }] }))
            .await?;
        require_str(self.id(), &result, "txid")
    }

    async fn sign_message(&self, account: &WalletAccount, message: &str, protocol: SignMessageProtocol) -> Result<String> {
        check_protocol(self.id(), self.sign_message_protocols(), protocol)?;
        let params = json!({
            "address": account.payment_address,
            "message": message,
            "protocol": Self::protocol_name(protocol),
        });
        let result = self.request("signMessage", params).await?;
        require_str(self.id(), &result, "signature")
    }

    async fn sign_psbt(&self, account: &WalletAccount, request: &SignPsbtRequest) -> Result<SignResult> {
        let params = json!({
            "psbt": request.psbt.base64,
            "signInputs": Self::sign_inputs(request, account)?,
            "broadcast": request.broadcast,
        });
        let signed: SatsConnectSigned = serde_json::from_value(self.request("signPsbt", params).await?)?;
        let mut psbt = EncodedPsbt::from_base64(&signed.psbt)?;

        if let Some(txid) = signed.txid {
            return Ok(SignResult::Broadcast { txid, psbt: Some(psbt) });
        }
        if request.finalize && self.profile.finalize_locally {
            let mut inner = psbt.to_psbt()?;
            let count = finalize_signed_inputs(&mut inner)?;
            log::debug!("[{}Wallet] Finalized {} inputs locally", self.id(), count);
            psbt = EncodedPsbt::from_psbt(&inner);
        }
        Ok(SignResult::Signed { psbt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_account, test_psbt, MockWallet};

    fn addresses_response(account: &WalletAccount) -> JsonValue {
        json!({
            "status": "success",
            "result": { "addresses": [
                { "address": account.payment_address, "publicKey": account.payment_public_key, "purpose": "payment" },
                { "address": account.address, "publicKey": account.public_key, "purpose": "ordinals" },
            ]}
        })
    }

    #[tokio::test]
    async fn connect_picks_addresses_by_purpose() {
        let account = test_account(NetworkType::Testnet);
        let wallet = MockWallet::new().respond("getAddresses", addresses_response(&account));
        let adapter = xverse(Arc::new(wallet.clone()));

        let connected = adapter.connect(NetworkType::Testnet4).await.unwrap();
        assert_eq!(connected, account);
        let params = wallet.params_of("getAddresses").unwrap();
        assert_eq!(params["network"]["type"], "Testnet");
    }

    #[tokio::test]
    async fn error_envelope_with_rejection_code_is_user_rejected() {
        let wallet = MockWallet::new().respond(
            "signMessage",
            json!({ "status": "error", "error": { "code": -32000, "message": "User rejected request" } }),
        );
        let adapter = xverse(Arc::new(wallet));
        let account = test_account(NetworkType::Mainnet);
        let err = adapter
            .sign_message(&account, "hello", SignMessageProtocol::Bip322)
            .await
            .unwrap_err();
        assert!(matches!(err, LaserEyesError::UserRejected(ProviderId::Xverse)));
    }

    #[tokio::test]
    async fn wallet_broadcast_is_reported_with_its_txid() {
        let psbt = test_psbt();
        let wallet = MockWallet::new().respond(
            "signPsbt",
            json!({ "status": "success", "result": { "psbt": psbt.base64, "txid": "cd".repeat(32) } }),
        );
        let adapter = xverse(Arc::new(wallet.clone()));
        let account = test_account(NetworkType::Mainnet);

        let result = adapter
            .sign_psbt(&account, &SignPsbtRequest::new(psbt).broadcast(true))
            .await
            .unwrap();
        assert_eq!(result.txid(), Some("cd".repeat(32).as_str()));
        assert_eq!(wallet.params_of("signPsbt").unwrap()["broadcast"], true);
    }

    #[tokio::test]
    async fn network_switch_is_unsupported() {
        let adapter = xverse(Arc::new(MockWallet::new()));
        assert!(!adapter.supports_network_switch());
        let err = adapter.switch_network(NetworkType::Signet).await.unwrap_err();
        assert!(matches!(err, LaserEyesError::NetworkSwitchUnsupported(ProviderId::Xverse)));
    }
}
