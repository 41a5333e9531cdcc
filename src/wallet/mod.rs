//! Wallet adapters.
//!
//! Browser-extension wallets inject a global object into the page some time
//! after load. Each one exposes a slightly different API. The host
//! environment reaches those globals through an [`InjectedWallet`] bridge
//! obtained from an [`ExtensionHost`]; each adapter in this module turns one
//! wallet's calls and response shapes into the common [`WalletAdapter`]
//! surface.

pub mod leather;
pub mod magic_eden;
pub mod okx;
pub mod orange;
pub mod oyl;
pub mod phantom;
pub mod session;
pub mod unisat;
pub mod xverse;

pub use session::{ActiveWallet, FileSessionStore, MemorySessionStore, Session, SessionStore};

use crate::network::NetworkType;
use crate::psbt::{SignPsbtRequest, SignResult};
use crate::time::{TimeProvider, TokioTime};
use crate::types::{Inscription, SignMessageProtocol};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use bitcoin::psbt::Psbt;
use bitcoin::Address;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId {
    Unisat,
    Xverse,
    Oyl,
    Leather,
    MagicEden,
    Okx,
    Phantom,
    Wizz,
    Orange,
}

impl ProviderId {
    pub const ALL: [ProviderId; 9] = [
        ProviderId::Unisat,
        ProviderId::Xverse,
        ProviderId::Oyl,
        ProviderId::Leather,
        ProviderId::MagicEden,
        ProviderId::Okx,
        ProviderId::Phantom,
        ProviderId::Wizz,
        ProviderId::Orange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Unisat => "unisat",
            ProviderId::Xverse => "xverse",
            ProviderId::Oyl => "oyl",
            ProviderId::Leather => "leather",
            ProviderId::MagicEden => "magic-eden",
            ProviderId::Okx => "okx",
            ProviderId::Phantom => "phantom",
            ProviderId::Wizz => "wizz",
            ProviderId::Orange => "orange",
        }
    }

    /// Path of the global object the extension injects.
    pub fn global_name(&self) -> &'static str {
        match self {
            ProviderId::Unisat => "unisat",
            ProviderId::Xverse => "XverseProviders.BitcoinProvider",
            ProviderId::Oyl => "oyl",
            ProviderId::Leather => "LeatherProvider",
            ProviderId::MagicEden => "magicEden.bitcoin",
            ProviderId::Okx => "okxwallet",
            ProviderId::Phantom => "phantom.bitcoin",
            ProviderId::Wizz => "wizz",
            ProviderId::Orange => "OrangeWalletProviders.OrangeBitcoinProvider",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = LaserEyesError;

    fn from_str(s: &str) -> Result<Self> {
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| LaserEyesError::Wallet(format!("unknown wallet provider: {s}")))
    }
}

/// Addresses and keys a wallet hands out on connect. Single-address wallets
/// repeat the ordinals address and key as the payment pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub address: String,
    pub public_key: String,
    pub payment_address: String,
    pub payment_public_key: String,
}

impl WalletAccount {
    pub fn single(address: impl Into<String>, public_key: impl Into<String>) -> Self {
        let address = address.into();
        let public_key = public_key.into();
        Self {
            payment_address: address.clone(),
            payment_public_key: public_key.clone(),
            address,
            public_key,
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        if self.address == self.payment_address {
            vec![self.address.clone()]
        } else {
            vec![self.address.clone(), self.payment_address.clone()]
        }
    }
}

/// Error raised by the injected wallet object itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeError {
    pub code: Option<i64>,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// EIP-1193 `4001` and the sats-connect `USER_REJECTION` code, plus the
    /// wording wallets use when they omit a code.
    pub fn is_user_rejection(&self) -> bool {
        if matches!(self.code, Some(4001) | Some(-32000)) {
            return true;
        }
        let message = self.message.to_ascii_lowercase();
        ["reject", "cancel", "denied", "declined"]
            .iter()
            .any(|word| message.contains(word))
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Calls into a wallet's injected global. `method` is the wallet's own
/// method name and `params` its positional or named arguments.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait InjectedWallet: Send + Sync {
    async fn call(&self, method: &str, params: JsonValue) -> core::result::Result<JsonValue, BridgeError>;
}

/// Looks up injected globals in the host environment.
pub trait ExtensionHost: Send + Sync {
    fn lookup(&self, global: &str) -> Option<Arc<dyn InjectedWallet>>;
}

/// Polls an [`ExtensionHost`] for wallet globals, which extensions inject
/// asynchronously after page load.
#[derive(Clone)]
pub struct WalletDiscovery {
    host: Arc<dyn ExtensionHost>,
    interval: Duration,
    timeout: Duration,
    time: Arc<dyn TimeProvider>,
}

impl WalletDiscovery {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(host: Arc<dyn ExtensionHost>, timeout: Duration) -> Self {
        Self {
            host,
            interval: Self::DEFAULT_INTERVAL,
            timeout,
            time: Arc::new(TokioTime),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    pub fn detect_available(&self, provider: ProviderId) -> bool {
        self.host.lookup(provider.global_name()).is_some()
    }

    pub fn available(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.detect_available(*p))
            .collect()
    }

    /// Waits for the provider's global to appear, failing with
    /// `WalletNotInstalled` once the timeout elapses.
    pub async fn wait_for(&self, provider: ProviderId) -> Result<Arc<dyn InjectedWallet>> {
        let interval = (self.interval.as_millis() as u64).max(1);
        let timeout = self.timeout.as_millis() as u64;
        let mut waited = 0u64;
        loop {
            if let Some(bridge) = self.host.lookup(provider.global_name()) {
                return Ok(bridge);
            }
            if waited >= timeout {
                log::warn!("[WalletDiscovery] {} not detected after {}ms", provider, waited);
                return Err(LaserEyesError::WalletNotInstalled(provider));
            }
            self.time.sleep_ms(interval).await;
            waited += interval;
        }
    }
}

/// The capability surface every wallet is normalized to.
///
/// Operations a wallet cannot perform fail with a typed error
/// (`UnsupportedOperation`, `UnsupportedProtocol`, `NetworkSwitchUnsupported`)
/// instead of silently degrading.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait WalletAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    fn supports_network_switch(&self) -> bool {
        false
    }

    /// Whether the wallet can build and broadcast a plain BTC transfer itself.
    fn supports_native_send(&self) -> bool {
        true
    }

    fn sign_message_protocols(&self) -> &'static [SignMessageProtocol];

    /// Runs the wallet's native connect flow.
    async fn connect(&self, network: NetworkType) -> Result<WalletAccount>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Network the wallet is currently on; wallets that cannot report it
    /// answer with `current`.
    async fn get_network(&self, current: NetworkType) -> Result<NetworkType> {
        Ok(current)
    }

    async fn switch_network(&self, _network: NetworkType) -> Result<()> {
        Err(LaserEyesError::NetworkSwitchUnsupported(self.id()))
    }

    async fn request_accounts(&self, network: NetworkType) -> Result<Vec<String>> {
        Ok(self.connect(network).await?.addresses())
    }

    async fn get_public_key(&self, network: NetworkType) -> Result<String> {
        Ok(self.connect(network).await?.public_key)
    }

    async fn get_balance(&self, _account: &WalletAccount) -> Result<u64> {
        Err(LaserEyesError::unsupported(self.id().as_str(), "balance lookup"))
    }

    async fn get_inscriptions(&self, _account: &WalletAccount, _offset: usize, _limit: usize) -> Result<Vec<Inscription>> {
        Err(LaserEyesError::unsupported(self.id().as_str(), "inscription listing"))
    }

    async fn send_btc(&self, _account: &WalletAccount, _to: &str, _amount: u64) -> Result<String> {
        Err(LaserEyesError::unsupported(self.id().as_str(), "native BTC send"))
    }

    async fn sign_message(&self, account: &WalletAccount, message: &str, protocol: SignMessageProtocol) -> Result<String>;

    async fn sign_psbt(&self, account: &WalletAccount, request: &SignPsbtRequest) -> Result<SignResult>;

    /// Batch signing. Wallets without a batch API sign one at a time.
    async fn sign_psbts(&self, account: &WalletAccount, requests: &[SignPsbtRequest]) -> Result<Vec<SignResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.sign_psbt(account, request).await?);
        }
        Ok(results)
    }

    /// Broadcasts a signed PSBT through the wallet's own backend.
    async fn push_psbt(&self, _psbt_hex: &str) -> Result<String> {
        Err(LaserEyesError::unsupported(self.id().as_str(), "pushPsbt"))
    }
}

/// Builds the adapter for `provider` around its injected bridge.
pub fn create_adapter(provider: ProviderId, bridge: Arc<dyn InjectedWallet>) -> Arc<dyn WalletAdapter> {
    match provider {
        ProviderId::Unisat => Arc::new(unisat::UnisatAdapter::unisat(bridge)),
        ProviderId::Wizz => Arc::new(unisat::UnisatAdapter::wizz(bridge)),
        ProviderId::Okx => Arc::new(okx::OkxAdapter::new(bridge)),
        ProviderId::Xverse => Arc::new(xverse::xverse(bridge)),
        ProviderId::Orange => Arc::new(orange::orange(bridge)),
        ProviderId::MagicEden => Arc::new(magic_eden::magic_eden(bridge)),
        ProviderId::Leather => Arc::new(leather::LeatherAdapter::new(bridge)),
        ProviderId::Phantom => Arc::new(phantom::PhantomAdapter::new(bridge)),
        ProviderId::Oyl => Arc::new(oyl::OylAdapter::new(bridge)),
    }
}

/// Calls the bridge and maps wallet failures into the error taxonomy.
pub(crate) async fn invoke(
    provider: ProviderId,
    bridge: &dyn InjectedWallet,
    method: &str,
    params: JsonValue,
) -> Result<JsonValue> {
    log::debug!("[{}Wallet] calling {}", provider, method);
    bridge.call(method, params).await.map_err(|e| {
        if e.is_user_rejection() {
            LaserEyesError::UserRejected(provider)
        } else {
            LaserEyesError::Wallet(format!("{provider} {method}: {e}"))
        }
    })
}

/// Unwraps `{status, result}` / `{result}` / `{error}` RPC envelopes.
pub(crate) fn unwrap_rpc_envelope(provider: ProviderId, method: &str, response: JsonValue) -> Result<JsonValue> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let bridge_error = BridgeError::new(
            error.get("code").and_then(JsonValue::as_i64),
            error
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown wallet error"),
        );
        if bridge_error.is_user_rejection() {
            return Err(LaserEyesError::UserRejected(provider));
        }
        return Err(LaserEyesError::Wallet(format!("{provider} {method}: {bridge_error}")));
    }
    match response.get("result") {
        Some(result) => Ok(result.clone()),
        None => Ok(response),
    }
}

pub(crate) fn require_str(provider: ProviderId, value: &JsonValue, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| LaserEyesError::Wallet(format!("{provider} response is missing `{field}`")))
}

pub(crate) fn check_protocol(
    provider: ProviderId,
    supported: &[SignMessageProtocol],
    protocol: SignMessageProtocol,
) -> Result<()> {
    if supported.contains(&protocol) {
        Ok(())
    } else {
        Err(LaserEyesError::UnsupportedProtocol { provider, protocol })
    }
}

/// Groups PSBT input indexes by the account address that owns them.
/// Inputs without a witness UTXO are attributed to the payment address.
pub(crate) fn signing_indexes(psbt: &Psbt, network: NetworkType, account: &WalletAccount) -> Vec<(String, Vec<usize>)> {
    let mut ordinals = Vec::new();
    let mut payment = Vec::new();
    for (index, input) in psbt.inputs.iter().enumerate() {
        let owner = input
            .witness_utxo
            .as_ref()
            .and_then(|utxo| Address::from_script(&utxo.script_pubkey, network.bitcoin_network()).ok())
            .map(|address| address.to_string());
        match owner {
            None => payment.push(index),
            Some(owner) if owner == account.payment_address => payment.push(index),
            Some(owner) if owner == account.address => ordinals.push(index),
            Some(_) => {}
        }
    }
    let mut groups = Vec::new();
    if !ordinals.is_empty() {
        groups.push((account.address.clone(), ordinals));
    }
    if !payment.is_empty() {
        groups.push((account.payment_address.clone(), payment));
    }
    groups
}

/// Network an account's addresses are encoded for. Testnet, testnet4 and
/// signet share an encoding, so they all report as testnet.
pub(crate) fn account_network(account: &WalletAccount) -> NetworkType {
    if NetworkType::Mainnet.accepts_address(&account.address) {
        NetworkType::Mainnet
    } else if NetworkType::Regtest.accepts_address(&account.address)
        && account.address.to_ascii_lowercase().starts_with("bcrt1")
    {
        NetworkType::Regtest
    } else {
        NetworkType::Testnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockExtensionHost, MockWallet};

    #[test]
    fn provider_ids_roundtrip_through_strings() {
        for provider in ProviderId::ALL {
            assert_eq!(provider.as_str().parse::<ProviderId>().unwrap(), provider);
            let json = serde_json::to_string(&provider).unwrap();
            assert_eq!(json, format!("\"{}\"", provider.as_str()));
        }
        assert!("metamask".parse::<ProviderId>().is_err());
    }

    #[test]
    fn rejection_is_recognized_by_code_or_wording() {
        assert!(BridgeError::new(Some(4001), "nope").is_user_rejection());
        assert!(BridgeError::new(None, "User canceled the request").is_user_rejection());
        assert!(!BridgeError::new(Some(-32603), "internal error").is_user_rejection());
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_waits_for_late_injection() {
        let host = MockExtensionHost::new();
        let discovery = WalletDiscovery::new(Arc::new(host.clone()), Duration::from_secs(2));
        assert!(!discovery.detect_available(ProviderId::Unisat));

        let late = host.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            late.install(ProviderId::Unisat, Arc::new(MockWallet::new()));
        });

        assert!(discovery.wait_for(ProviderId::Unisat).await.is_ok());
        assert_eq!(discovery.available(), vec![ProviderId::Unisat]);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_times_out_as_not_installed() {
        let discovery = WalletDiscovery::new(Arc::new(MockExtensionHost::new()), Duration::from_secs(1));
        let err = discovery.wait_for(ProviderId::Leather).await.err().unwrap();
        assert!(matches!(err, LaserEyesError::WalletNotInstalled(ProviderId::Leather)));
    }
}
