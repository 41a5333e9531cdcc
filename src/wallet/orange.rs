//! Orange Wallet, a sats-connect wallet with a reduced network list.

use super::xverse::{SatsConnectAdapter, SatsConnectProfile};
use super::{InjectedWallet, ProviderId};
use crate::network::NetworkType;
use crate::types::SignMessageProtocol;
use std::sync::Arc;

fn orange_network_name(network: NetworkType) -> &'static str {
    match network {
        NetworkType::Testnet | NetworkType::Testnet4 | NetworkType::Signet | NetworkType::Regtest => "Testnet",
        NetworkType::Mainnet | NetworkType::FractalMainnet | NetworkType::FractalTestnet => "Mainnet",
    }
}

pub const ORANGE: SatsConnectProfile = SatsConnectProfile {
    provider: ProviderId::Orange,
    protocols: &[SignMessageProtocol::Bip322],
    mainnet_only: false,
    finalize_locally: true,
    network_name: orange_network_name,
};

pub fn orange(bridge: Arc<dyn InjectedWallet>) -> SatsConnectAdapter {
    SatsConnectAdapter::new(bridge, ORANGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_account, MockWallet};
    use crate::wallet::WalletAdapter;
    use crate::LaserEyesError;

    #[tokio::test]
    async fn ecdsa_messages_are_refused() {
        let adapter = orange(Arc::new(MockWallet::new()));
        let account = test_account(NetworkType::Mainnet);
        let err = adapter
            .sign_message(&account, "gm", SignMessageProtocol::Ecdsa)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LaserEyesError::UnsupportedProtocol {
                provider: ProviderId::Orange,
                protocol: SignMessageProtocol::Ecdsa
            }
        ));
    }

    #[test]
    fn signet_maps_to_testnet() {
        assert_eq!(orange_network_name(NetworkType::Signet), "Testnet");
    }
}
