//! Magic Eden Wallet. Speaks sats-connect, is mainnet only and returns
//! signed PSBTs without finalizing them.

use super::xverse::{SatsConnectAdapter, SatsConnectProfile};
use super::{InjectedWallet, ProviderId};
use crate::network::NetworkType;
use crate::types::SignMessageProtocol;
use std::sync::Arc;

fn mainnet(_: NetworkType) -> &'static str {
    "Mainnet"
}

pub const MAGIC_EDEN: SatsConnectProfile = SatsConnectProfile {
    provider: ProviderId::MagicEden,
    protocols: &[SignMessageProtocol::Ecdsa, SignMessageProtocol::Bip322],
    mainnet_only: true,
    finalize_locally: true,
    network_name: mainnet,
};

pub fn magic_eden(bridge: Arc<dyn InjectedWallet>) -> SatsConnectAdapter {
    SatsConnectAdapter::new(bridge, MAGIC_EDEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_account, test_psbt, MockWallet};
    use crate::psbt::{SignPsbtRequest, SignResult};
    use crate::wallet::WalletAdapter;
    use crate::LaserEyesErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn testnet_connect_is_refused_before_calling_the_wallet() {
        let wallet = MockWallet::new();
        let adapter = magic_eden(Arc::new(wallet.clone()));
        let err = adapter.connect(NetworkType::Testnet).await.unwrap_err();
        assert_eq!(err.kind(), LaserEyesErrorKind::UnsupportedOperation);
        assert!(wallet.calls().is_empty());
    }

    #[tokio::test]
    async fn signed_psbt_comes_back_without_broadcast() {
        let psbt = test_psbt();
        let wallet = MockWallet::new().respond(
            "signPsbt",
            json!({ "status": "success", "result": { "psbt": psbt.base64 } }),
        );
        let adapter = magic_eden(Arc::new(wallet));
        let account = test_account(NetworkType::Mainnet);
        let result = adapter
            .sign_psbt(&account, &SignPsbtRequest::new(psbt).broadcast(true))
            .await
            .unwrap();
        assert!(matches!(result, SignResult::Signed { .. }));
    }
}
