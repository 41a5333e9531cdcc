//! Phantom's bitcoin provider.
//!
//! Phantom cannot build a transfer on its own, so BTC sends go through the
//! transaction builder and come back here for signing.

use super::{
    account_network, check_protocol, invoke, signing_indexes, InjectedWallet, ProviderId, WalletAccount,
    WalletAdapter,
};
use crate::network::NetworkType;
use crate::psbt::{finalize_signed_inputs, EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::SignMessageProtocol;
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhantomAccount {
    address: String,
    public_key: String,
    purpose: String,
}

#[derive(Debug, Deserialize)]
struct PhantomSignature {
    signature: Vec<u8>,
}

pub struct PhantomAdapter {
    bridge: Arc<dyn InjectedWallet>,
}

impl PhantomAdapter {
    pub fn new(bridge: Arc<dyn InjectedWallet>) -> Self {
        Self { bridge }
    }

    async fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
        invoke(ProviderId::Phantom, self.bridge.as_ref(), method, params).await
    }

    async fn accounts(&self) -> Result<Vec<PhantomAccount>> {
        Ok(serde_json::from_value(self.call("requestAccounts", json!([])).await?)?)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl WalletAdapter for PhantomAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Phantom
    }

    fn supports_native_send(&self) -> bool {
        false
    }

    fn sign_message_protocols(&self) -> &'static [SignMessageProtocol] {
        &[SignMessageProtocol::Bip322]
    }

    async fn connect(&self, network: NetworkType) -> Result<WalletAccount> {
        let accounts = self.accounts().await?;
        let find = |purpose: &str| accounts.iter().find(|a| a.purpose == purpose);
        let (Some(ordinals), Some(payment)) = (find("ordinals"), find("payment")) else {
            return Err(LaserEyesError::Wallet("phantom returned no ordinals and payment accounts".to_string()));
        };
        if !network.accepts_address(&ordinals.address) {
            return Err(LaserEyesError::Wallet(format!(
                "phantom account {} is not a {network} address",
                ordinals.address
            )));
        }
        Ok(WalletAccount {
            address: ordinals.address.clone(),
            public_key: ordinals.public_key.clone(),
            payment_address: payment.address.clone(),
            payment_public_key: payment.public_key.clone(),
        })
    }

    async fn request_accounts(&self, _network: NetworkType) -> Result<Vec<String>> {
        Ok(self.accounts().await?.into_iter().map(|a| a.address).collect())
    }

    async fn sign_message(&self, account: &WalletAccount, message: &str, protocol: SignMessageProtocol) -> Result<String> {
        check_protocol(self.id(), self.sign_message_protocols(), protocol)?;
        let response: PhantomSignature = serde_json::from_value(
            self.call("signMessage", json!([account.payment_address, message.as_bytes()]))
                .await?,
        )?;
        Ok(base64::engine::general_purpose::STANDARD.encode(response.signature))
    }

    async fn sign_psbt(&self, account: &WalletAccount, request: &SignPsbtRequest) -> Result<SignResult> {
        let psbt = request.psbt.to_psbt()?;
        let inputs_to_sign: Vec<JsonValue> = signing_indexes(&psbt, account_network(account), account)
            .into_iter()
            .map(|(address, indexes)| json!({ "address": address, "signingIndexes": indexes }))
            .collect();
        let signed = self
            .call("signPsbt", json!([request.psbt.hex, { "inputsToSign": inputs_to_sign }]))
            .await?;
        let signed = signed
            .as_str()
            .ok_or_else(|| LaserEyesError::Wallet(format!("phantom signPsbt returned {signed}")))?;

        let mut psbt = EncodedPsbt::parse(signed)?.to_psbt()?;
        if request.finalize {
            finalize_signed_inputs(&mut psbt)?;
        }
        Ok(SignResult::Signed {
            psbt: EncodedPsbt::from_psbt(&psbt),
        })
    }
}
