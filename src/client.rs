//! The client façade.
//!
//! [`LaserEyesClient`] owns the network selection, the connected wallet and
//! the data source manager, and routes every public operation to the
//! wallet adapter, a transaction builder or the inscription engine. It has
//! no wallet quirks and no coin selection of its own.

use crate::builder::{
    brc20, build_inscription_send_psbt, create_alkanes_send_psbt, create_btc_send_psbt, create_rune_send_psbt,
    BuiltPsbt, InscriptionInput, DUST_LIMIT,
};
use crate::config::Config;
use crate::datasource::DataSourceManager;
use crate::inscribe::{
    InscribeOptions, InscriptionContent, InscriptionEngine, InscriptionOutcome, PendingReveal, PsbtSigner,
};
use crate::network::NetworkType;
use crate::psbt::{finalize_signed_inputs, EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::{AlkaneId, Inscription, MetaBalance, Protocol, SignMessageProtocol, Utxo};
use crate::wallet::{
    create_adapter, ActiveWallet, ExtensionHost, ProviderId, SessionStore, WalletAccount, WalletAdapter, WalletDiscovery,
};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use base64::Engine;
use bitcoin::consensus::encode::serialize_hex;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const INSCRIPTION_PAGE_SIZE: usize = 100;

/// Arguments of [`LaserEyesClient::send`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendArgs {
    pub to: String,
    /// Sats for BTC, a decimal for BRC-20 and runes, base units for alkanes.
    pub amount: String,
    /// BRC-20 ticker, rune id (`block:tx`) or alkane id (`block:tx`).
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub fee_rate: Option<f64>,
}

impl SendArgs {
    pub fn new(to: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            amount: amount.into(),
            asset: None,
            fee_rate: None,
        }
    }

    pub fn asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    pub fn fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    fn require_asset(&self, protocol: Protocol) -> Result<&str> {
        self.asset
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| LaserEyesError::AssetNotFound(format!("{protocol} send needs an asset id")))
    }
}

/// Signs with the connected wallet on the inscription engine's behalf.
pub struct WalletSigner {
    adapter: Arc<dyn WalletAdapter>,
    account: WalletAccount,
}

impl WalletSigner {
    pub fn new(adapter: Arc<dyn WalletAdapter>, account: WalletAccount) -> Self {
        Self { adapter, account }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PsbtSigner for WalletSigner {
    async fn sign_psbt(&self, request: SignPsbtRequest) -> Result<SignResult> {
        self.adapter.sign_psbt(&self.account, &request).await
    }
}

struct ClientState {
    network: NetworkType,
    wallet: Option<ActiveWallet>,
}

/// What an operation needs from the connected wallet, copied out so the
/// state lock is not held across wallet round-trips.
struct Connected {
    adapter: Arc<dyn WalletAdapter>,
    account: WalletAccount,
    network: NetworkType,
}

pub struct LaserEyesClient {
    config: Config,
    data_sources: DataSourceManager,
    discovery: WalletDiscovery,
    store: Arc<dyn SessionStore>,
    state: Mutex<ClientState>,
}

impl LaserEyesClient {
    pub fn new(config: Config, host: Arc<dyn ExtensionHost>, store: Arc<dyn SessionStore>) -> Result<Self> {
        config.validate()?;
        let data_sources = DataSourceManager::from_config(&config)?;
        let discovery = WalletDiscovery::new(host, config.wallet_timeout());
        Ok(Self::from_parts(config, data_sources, discovery, store))
    }

    /// Assembles a client from prebuilt parts, e.g. a manager over custom
    /// data sources.
    pub fn from_parts(
        config: Config,
        data_sources: DataSourceManager,
        discovery: WalletDiscovery,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let network = config.network;
        Self {
            config,
            data_sources,
            discovery,
            store,
            state: Mutex::new(ClientState { network, wallet: None }),
        }
    }

    pub fn data_sources(&self) -> &DataSourceManager {
        &self.data_sources
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wallets whose globals are present right now.
    pub fn available_wallets(&self) -> Vec<ProviderId> {
        self.discovery.available()
    }

    /// Reconnects the configured default provider when auto-connect is on
    /// and a session for it was persisted.
    pub async fn restore(&self) -> Result<Option<WalletAccount>> {
        let Some(options) = &self.config.wallet_options else {
            return Ok(None);
        };
        let Some(provider) = options.default_provider.filter(|_| options.auto_connect) else {
            return Ok(None);
        };
        if self.store.get(provider)?.is_none() {
            return Ok(None);
        }
        self.connect(provider).await.map(Some)
    }

    pub async fn connect(&self, provider: ProviderId) -> Result<WalletAccount> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.wallet.take() {
            log::info!("[LaserEyesClient] Switching from {} to {}", previous.provider(), provider);
            previous.disconnect().await?;
        }

        let bridge = self.discovery.wait_for(provider).await?;
        let adapter = create_adapter(provider, bridge);
        let mut wallet = ActiveWallet::connect(adapter, self.store.clone(), state.network).await?;
        let account = wallet.account();

        match self
            .data_sources
            .get_balance(state.network, &account.payment_address, None)
            .await
        {
            Ok(balance) => wallet.set_balance(balance)?,
            Err(e) => log::warn!("[LaserEyesClient] Balance unavailable for {}: {}", account.payment_address, e),
        }
        state.wallet = Some(wallet);
        Ok(account)
    }

    pub async fn disconnect(&self) -> Result<()> {
        let wallet = self.state.lock().await.wallet.take();
        match wallet {
            Some(wallet) => wallet.disconnect().await,
            None => Ok(()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.wallet.is_some()
    }

    pub async fn provider(&self) -> Option<ProviderId> {
        self.state.lock().await.wallet.as_ref().map(ActiveWallet::provider)
    }

    pub async fn account(&self) -> Option<WalletAccount> {
        self.state.lock().await.wallet.as_ref().map(ActiveWallet::account)
    }

    /// The wallet's network when one is connected, otherwise the client's.
    pub async fn get_network(&self) -> Result<NetworkType> {
        let (adapter, network) = {
            let state = self.state.lock().await;
            (state.wallet.as_ref().map(|w| w.adapter().clone()), state.network)
        };
        match adapter {
            Some(adapter) => adapter.get_network(network).await,
            None => Ok(network),
        }
    }

    /// Moves the client, and the connected wallet if any, to `network`.
    /// Wallets that cannot switch leave the current session untouched.
    pub async fn switch_network(&self, network: NetworkType) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.network == network {
            return Ok(());
        }
        if let Some(wallet) = &state.wallet {
            let adapter = wallet.adapter().clone();
            if !adapter.supports_network_switch() {
                return Err(LaserEyesError::NetworkSwitchUnsupported(adapter.id()));
            }
            adapter.switch_network(network).await?;
            self.store.clear(adapter.id())?;
            // the wallet is on `network` now, so the old session is stale either way
            match ActiveWallet::connect(adapter.clone(), self.store.clone(), network).await {
                Ok(refreshed) => state.wallet = Some(refreshed),
                Err(e) => {
                    log::warn!(
                        "[LaserEyesClient] {} switched to {} but did not reconnect: {}",
                        adapter.id(),
                        network,
                        e
                    );
                    state.wallet = None;
                    state.network = network;
                    self.data_sources.clear_cache();
                    return Err(e);
                }
            }
        }
        log::info!("[LaserEyesClient] Network changed from {} to {}", state.network, network);
        state.network = network;
        self.data_sources.clear_cache();
        Ok(())
    }

    async fn connected(&self) -> Result<Connected> {
        let state = self.state.lock().await;
        let wallet = state.wallet.as_ref().ok_or(LaserEyesError::NotConnected)?;
        Ok(Connected {
            adapter: wallet.adapter().clone(),
            account: wallet.account(),
            network: state.network,
        })
    }

    pub async fn request_accounts(&self) -> Result<Vec<String>> {
        let c = self.connected().await?;
        c.adapter.request_accounts(c.network).await
    }

    pub async fn get_public_key(&self) -> Result<String> {
        let c = self.connected().await?;
        c.adapter.get_public_key(c.network).await
    }

    /// Balance of the payment address in sats, remembered in the session.
    pub async fn get_balance(&self) -> Result<u64> {
        let c = self.connected().await?;
        let balance = self
            .data_sources
            .get_balance(c.network, &c.account.payment_address, None)
            .await?;
        if let Some(wallet) = self.state.lock().await.wallet.as_mut() {
            wallet.set_balance(balance)?;
        }
        Ok(balance)
    }

    pub async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let network = self.state.lock().await.network;
        self.data_sources.get_address_utxos(network, address, None).await
    }

    /// Inscriptions at the ordinals address. Falls back to the wallet when
    /// no data source indexes inscriptions.
    pub async fn get_inscriptions(&self, offset: usize, limit: usize) -> Result<Vec<Inscription>> {
        let c = self.connected().await?;
        match self
            .data_sources
            .get_inscriptions(c.network, &c.account.address, offset, limit, None)
            .await
        {
            Err(LaserEyesError::NoCapableProvider(_)) => c.adapter.get_inscriptions(&c.account, offset, limit).await,
            result => result,
        }
    }

    pub async fn get_meta_balances(&self, protocol: Protocol) -> Result<Vec<MetaBalance>> {
        let c = self.connected().await?;
        let address = match protocol {
            Protocol::Btc => &c.account.payment_address,
            _ => &c.account.address,
        };
        self.data_sources.get_meta_balances(c.network, address, protocol, None).await
    }

    /// Signs with the protocol given, or the wallet's first supported one.
    pub async fn sign_message(&self, message: &str, protocol: Option<SignMessageProtocol>) -> Result<String> {
        let c = self.connected().await?;
        let protocol = match protocol {
            Some(protocol) => protocol,
            None => c
                .adapter
                .sign_message_protocols()
                .first()
                .copied()
                .ok_or_else(|| LaserEyesError::unsupported(c.adapter.id().as_str(), "message signing"))?,
        };
        c.adapter.sign_message(&c.account, message, protocol).await
    }

    /// Hands a PSBT to the wallet. When `broadcast` was requested and the
    /// wallet only signed, the transaction is pushed through the data
    /// sources.
    pub async fn sign_psbt(&self, request: SignPsbtRequest) -> Result<SignResult> {
        let c = self.connected().await?;
        let result = c.adapter.sign_psbt(&c.account, &request).await?;
        self.complete_broadcast(c.network, &request, result).await
    }

    pub async fn sign_psbts(&self, requests: Vec<SignPsbtRequest>) -> Result<Vec<SignResult>> {
        let c = self.connected().await?;
        let results = c.adapter.sign_psbts(&c.account, &requests).await?;
        let mut completed = Vec::with_capacity(results.len());
        for (request, result) in requests.iter().zip(results) {
            completed.push(self.complete_broadcast(c.network, request, result).await?);
        }
        Ok(completed)
    }

    async fn complete_broadcast(
        &self,
        network: NetworkType,
        request: &SignPsbtRequest,
        result: SignResult,
    ) -> Result<SignResult> {
        match result {
            SignResult::Signed { psbt } if request.broadcast => {
                log::info!("[LaserEyesClient] Wallet only signed, pushing through data sources");
                let txid = self.push_signed(network, &psbt).await?;
                Ok(SignResult::Broadcast { txid, psbt: Some(psbt) })
            }
            other => Ok(other),
        }
    }

    /// Broadcasts a signed PSBT (hex or base64) or a raw transaction hex.
    pub async fn push_psbt(&self, encoded: &str) -> Result<String> {
        let network = self.state.lock().await.network;
        match EncodedPsbt::parse(encoded) {
            Ok(psbt) => self.push_signed(network, &psbt).await,
            Err(_) => {
                let raw = encoded.trim();
                hex::decode(raw)?;
                self.data_sources.broadcast_transaction(network, raw, None).await
            }
        }
    }

    async fn push_signed(&self, network: NetworkType, psbt: &EncodedPsbt) -> Result<String> {
        let mut psbt = psbt.to_psbt()?;
        finalize_signed_inputs(&mut psbt)?;
        let tx = psbt.extract_tx_unchecked_fee_rate();
        self.data_sources
            .broadcast_transaction(network, &serialize_hex(&tx), None)
            .await
    }

    /// Signs a freshly built PSBT with the wallet and broadcasts it.
    async fn sign_and_push(&self, c: &Connected, built: BuiltPsbt) -> Result<String> {
        let request = SignPsbtRequest::new(built.psbt).finalize(true).broadcast(false);
        match c.adapter.sign_psbt(&c.account, &request).await? {
            SignResult::Broadcast { txid, .. } => Ok(txid),
            SignResult::Signed { psbt } => self.push_signed(c.network, &psbt).await,
        }
    }

    /// Sends `amount` sats. Wallets with a native send build the
    /// transaction themselves; the rest sign a PSBT built here.
    pub async fn send_btc(&self, to: &str, amount: u64) -> Result<String> {
        let c = self.connected().await?;
        if amount < DUST_LIMIT {
            return Err(LaserEyesError::InvalidAmount(amount));
        }
        c.network.parse_address(to)?;
        if c.adapter.supports_native_send() {
            log::info!("[LaserEyesClient] Sending {} sats to {} through {}", amount, to, c.adapter.id());
            return c.adapter.send_btc(&c.account, to, amount).await;
        }
        let built = create_btc_send_psbt(&self.data_sources, c.network, &c.account, to, amount, None).await?;
        self.sign_and_push(&c, built).await
    }

    /// Sends an asset of `protocol`, returning the txid of the transfer.
    pub async fn send(&self, protocol: Protocol, args: SendArgs) -> Result<String> {
        match protocol {
            Protocol::Btc => {
                let amount: u64 = args
                    .amount
                    .trim()
                    .parse()
                    .map_err(|_| LaserEyesError::MalformedAmount(args.amount.clone()))?;
                self.send_btc(&args.to, amount).await
            }
            Protocol::Runes => {
                let c = self.connected().await?;
                let rune_id = args.require_asset(protocol)?;
                let built = create_rune_send_psbt(
                    &self.data_sources,
                    c.network,
                    &c.account,
                    rune_id,
                    &args.to,
                    &args.amount,
                    args.fee_rate,
                )
                .await?;
                self.sign_and_push(&c, built).await
            }
            Protocol::Alkanes => {
                let c = self.connected().await?;
                let id = AlkaneId::from_str(args.require_asset(protocol)?)?;
                let amount: u128 = args
                    .amount
                    .trim()
                    .parse()
                    .map_err(|_| LaserEyesError::MalformedAmount(args.amount.clone()))?;
                let built =
                    create_alkanes_send_psbt(&self.data_sources, c.network, &c.account, id, &args.to, amount, args.fee_rate)
                        .await?;
                self.sign_and_push(&c, built).await
            }
            Protocol::Brc20 => self.send_brc20(&args).await,
        }
    }

    /// Inscribes a transfer to the sender's own ordinals address, waits for
    /// the reveal, then moves that inscription to the recipient.
    async fn send_brc20(&self, args: &SendArgs) -> Result<String> {
        let c = self.connected().await?;
        let ticker = args.require_asset(Protocol::Brc20)?;
        c.network.parse_address(&args.to)?;
        let body = brc20::brc20_transfer_content(ticker, &args.amount)?;
        let content = InscriptionContent::new(
            base64::engine::general_purpose::STANDARD.encode(body),
            brc20::BRC20_MIME_TYPE,
        );
        let options = InscribeOptions {
            fee_rate: args.fee_rate,
            op_return: None,
        };
        let outcome = self.run_inscription(&c, vec![content], options).await?;

        if !self.data_sources.wait_for_transaction(c.network, &outcome.reveal_txid).await? {
            return Err(LaserEyesError::CommitConfirmationTimeout {
                commit_txid: outcome.reveal_txid,
            });
        }
        let (utxos, fees) = futures::try_join!(
            self.data_sources.get_address_utxos(c.network, &c.account.payment_address, None),
            self.data_sources.get_recommended_fees(c.network, None),
        )?;
        let transfer = InscriptionInput::new(&outcome.reveal_txid, 0, crate::inscribe::INSCRIPTION_POSTAGE);
        let rate = args.fee_rate.unwrap_or(fees.fast_fee);
        let built = build_inscription_send_psbt(c.network, &c.account, &[transfer], utxos, &args.to, rate)?;
        log::info!("[LaserEyesClient] Sending brc-20 transfer {} to {}", outcome.inscription_ids[0], args.to);
        self.sign_and_push(&c, built).await
    }

    /// Moves inscriptions owned by the ordinals address to `to`.
    pub async fn send_inscriptions(&self, inscription_ids: &[String], to: &str) -> Result<String> {
        let c = self.connected().await?;
        let mut wanted: HashMap<&str, Option<InscriptionInput>> =
            inscription_ids.iter().map(|id| (id.as_str(), None)).collect();
        let mut offset = 0;
        while wanted.values().any(Option::is_none) {
            let page = self
                .data_sources
                .get_inscriptions(c.network, &c.account.address, offset, INSCRIPTION_PAGE_SIZE, None)
                .await?;
            for inscription in &page {
                if let Some(slot) = wanted.get_mut(inscription.id.as_str()) {
                    *slot = Some(InscriptionInput::from_inscription(inscription)?);
                }
            }
            if page.len() < INSCRIPTION_PAGE_SIZE {
                break;
            }
            offset += page.len();
        }

        let mut inputs = Vec::with_capacity(inscription_ids.len());
        for id in inscription_ids {
            match wanted.get_mut(id.as_str()).and_then(Option::take) {
                Some(input) => inputs.push(input),
                None => return Err(LaserEyesError::AssetNotFound(format!("inscription {id}"))),
            }
        }
        let (utxos, fees) = futures::try_join!(
            self.data_sources.get_address_utxos(c.network, &c.account.payment_address, None),
            self.data_sources.get_recommended_fees(c.network, None),
        )?;
        let built = build_inscription_send_psbt(c.network, &c.account, &inputs, utxos, to, fees.fast_fee)?;
        self.sign_and_push(&c, built).await
    }

    /// Inscribes one item and returns the reveal txid.
    pub async fn inscribe(&self, content_base64: &str, mime_type: &str) -> Result<String> {
        let outcome = self
            .inscribe_batch(
                vec![InscriptionContent::new(content_base64, mime_type)],
                InscribeOptions::default(),
            )
            .await?;
        Ok(outcome.reveal_txid)
    }

    /// Inscribes several items under one commit. Reveal outputs follow the
    /// order of `contents`.
    pub async fn inscribe_batch(
        &self,
        contents: Vec<InscriptionContent>,
        options: InscribeOptions,
    ) -> Result<InscriptionOutcome> {
        let c = self.connected().await?;
        self.run_inscription(&c, contents, options).await
    }

    async fn run_inscription(
        &self,
        c: &Connected,
        contents: Vec<InscriptionContent>,
        options: InscribeOptions,
    ) -> Result<InscriptionOutcome> {
        let signer = WalletSigner::new(c.adapter.clone(), c.account.clone());
        InscriptionEngine::new(&self.data_sources, &signer, c.network)
            .inscribe(&c.account, contents, options)
            .await
    }

    /// Finishes an inscription whose commit went out but whose reveal did
    /// not. No wallet is needed: the reveal is signed with the one-time key.
    pub async fn reveal_from_commit(&self, pending: PendingReveal) -> Result<InscriptionOutcome> {
        let network = self.state.lock().await.network;
        let signer = NoSigner;
        InscriptionEngine::new(&self.data_sources, &signer, network)
            .reveal_from_commit(pending)
            .await
    }

    /// Drops the connected wallet and cached responses. The persisted
    /// session is kept so [`restore`](Self::restore) can pick it up.
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        if let Some(wallet) = state.wallet.take() {
            log::info!("[LaserEyesClient] Disposing {} session", wallet.provider());
        }
        self.data_sources.clear_cache();
    }
}

/// Signer for flows that never reach the commit step.
struct NoSigner;

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PsbtSigner for NoSigner {
    async fn sign_psbt(&self, _request: SignPsbtRequest) -> Result<SignResult> {
        Err(LaserEyesError::NotConnected)
    }
}
