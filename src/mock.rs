//! In-memory doubles for the data source, wallet bridge and extension host,
//! plus deterministic test keys.
//!
//! Compiled for unit tests and behind the `test-utils` feature for
//! integration tests.

use crate::datasource::{Capability, DataSource};
use crate::inscribe::PsbtSigner;
use crate::network::NetworkType;
use crate::psbt::{EncodedPsbt, SignPsbtRequest, SignResult};
use crate::types::{
    AlkaneOutpoint, FeeEstimate, Inscription, MetaBalance, Protocol, RuneInfo, RuneOutpoint, TransactionInfo,
    TxOutputInfo, Utxo,
};
use crate::wallet::{BridgeError, ExtensionHost, InjectedWallet, ProviderId, WalletAccount};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak};
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use core::str::FromStr;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ORDINALS_SECRET: [u8; 32] = [0x11; 32];
pub const PAYMENT_SECRET: [u8; 32] = [0x22; 32];

fn keypair(secret: &[u8; 32]) -> Keypair {
    Keypair::from_seckey_slice(&Secp256k1::new(), secret).expect("valid test secret")
}

/// A taproot ordinals address and a native segwit payment address derived
/// from fixed secrets.
pub fn test_account(network: NetworkType) -> WalletAccount {
    let secp = Secp256k1::new();
    let net = network.bitcoin_network();
    let ordinals = keypair(&ORDINALS_SECRET);
    let (xonly, _) = ordinals.x_only_public_key();
    let payment = CompressedPublicKey(keypair(&PAYMENT_SECRET).public_key());
    WalletAccount {
        address: Address::p2tr(&secp, xonly, None, net).to_string(),
        public_key: hex::encode(ordinals.public_key().serialize()),
        payment_address: Address::p2wpkh(&payment, net).to_string(),
        payment_public_key: hex::encode(payment.to_bytes()),
    }
}

/// Txid made of one repeated byte.
pub fn test_txid(seed: u8) -> String {
    format!("{seed:02x}").repeat(32)
}

/// A plain UTXO locked to `address`.
pub fn funding_utxo(network: NetworkType, address: &str, value: u64, seed: u8) -> Utxo {
    let script = network.parse_address(address).expect("test address").script_pubkey();
    Utxo {
        script_pub_key: hex::encode(script.as_bytes()),
        confirmations: 1,
        ..Utxo::new(test_txid(seed), 0, value)
    }
}

/// Unsigned one-in one-out PSBT spending from the test payment key.
pub fn test_psbt() -> EncodedPsbt {
    let account = test_account(NetworkType::Mainnet);
    let script = NetworkType::Mainnet
        .parse_address(&account.payment_address)
        .expect("test address")
        .script_pubkey();
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::from_str(&test_txid(0xaa)).expect("txid"),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(9_000),
            script_pubkey: script.clone(),
        }],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).expect("unsigned tx");
    psbt.inputs[0].witness_utxo = Some(TxOut {
        value: Amount::from_sat(10_000),
        script_pubkey: script,
    });
    EncodedPsbt::from_psbt(&psbt)
}

/// Signs and finalizes every input locked to one of the test keys, either
/// as a taproot key-path spend or as P2WPKH. Returns the number signed.
pub fn sign_with_test_keys(psbt: &mut Psbt) -> Result<usize> {
    let secp = Secp256k1::new();
    let prevouts: Vec<TxOut> = psbt
        .inputs
        .iter()
        .map(|input| input.witness_utxo.clone())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| LaserEyesError::Psbt("every input needs a witness utxo".to_string()))?;
    let tx = psbt.unsigned_tx.clone();
    let mut cache = SighashCache::new(&tx);
    let keys = [keypair(&ORDINALS_SECRET), keypair(&PAYMENT_SECRET)];

    let mut signed = 0;
    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        if input.final_script_witness.is_some() {
            continue;
        }
        let utxo = &prevouts[index];
        for key in &keys {
            let (xonly, _) = key.x_only_public_key();
            if utxo.script_pubkey == ScriptBuf::new_p2tr(&secp, xonly, None) {
                let sighash =
                    cache.taproot_key_spend_signature_hash(index, &Prevouts::All(&prevouts), TapSighashType::Default)?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let tweaked = key.tap_tweak(&secp, None).to_inner();
                let signature = bitcoin::taproot::Signature {
                    signature: secp.sign_schnorr_no_aux_rand(&msg, &tweaked),
                    sighash_type: TapSighashType::Default,
                };
                input.final_script_witness = Some(Witness::p2tr_key_spend(&signature));
                signed += 1;
                break;
            }
            let pubkey = CompressedPublicKey(key.public_key());
            if utxo.script_pubkey == ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()) {
                let sighash = cache
                    .p2wpkh_signature_hash(index, &utxo.script_pubkey, utxo.value, EcdsaSighashType::All)
                    .map_err(|e| LaserEyesError::Transaction(e.to_string()))?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = bitcoin::ecdsa::Signature {
                    signature: secp.sign_ecdsa(&msg, &key.secret_key()),
                    sighash_type: EcdsaSighashType::All,
                };
                input.final_script_witness =
                    Some(Witness::from_slice(&[signature.to_vec(), pubkey.to_bytes().to_vec()]));
                signed += 1;
                break;
            }
        }
    }
    Ok(signed)
}

/// Signs with the test keys, standing in for a wallet.
#[derive(Debug, Clone, Default)]
pub struct MockSigner {
    calls: Arc<AtomicUsize>,
    broadcast: bool,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the transaction was broadcast by the wallet.
    pub fn broadcasting(mut self) -> Self {
        self.broadcast = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PsbtSigner for MockSigner {
    async fn sign_psbt(&self, request: SignPsbtRequest) -> Result<SignResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut psbt = request.psbt.to_psbt()?;
        sign_with_test_keys(&mut psbt)?;
        let signed = EncodedPsbt::from_psbt(&psbt);
        if self.broadcast {
            let txid = psbt.unsigned_tx.compute_txid().to_string();
            return Ok(SignResult::Broadcast { txid, psbt: Some(signed) });
        }
        Ok(SignResult::Signed { psbt: signed })
    }
}

#[derive(Debug, Default)]
struct MockState {
    balances: HashMap<String, u64>,
    utxos: HashMap<String, Vec<Utxo>>,
    transactions: HashMap<String, TransactionInfo>,
    fees: Option<FeeEstimate>,
    runes: HashMap<String, RuneInfo>,
    rune_outpoints: HashMap<String, Vec<RuneOutpoint>>,
    alkanes: HashMap<String, Vec<AlkaneOutpoint>>,
    inscriptions: HashMap<String, Vec<Inscription>>,
    meta_balances: HashMap<String, Vec<MetaBalance>>,
    broadcasts: Vec<String>,
    calls: usize,
}

/// Data source answering from in-memory maps.
#[derive(Debug, Clone)]
pub struct MockDataSource {
    name: String,
    capabilities: Vec<Capability>,
    failing: bool,
    auto_confirm: bool,
    state: Arc<Mutex<MockState>>,
}

impl MockDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capabilities: vec![
                Capability::Utxos,
                Capability::Balance,
                Capability::Transaction,
                Capability::Fees,
                Capability::Broadcast,
            ],
            failing: false,
            auto_confirm: false,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Every call fails with a network error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    fn add_capability(&mut self, capability: Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    /// Broadcast transactions become visible to `get_transaction` at once.
    pub fn with_auto_confirm(mut self) -> Self {
        self.auto_confirm = true;
        self
    }

    pub fn with_balance(self, address: &str, balance: u64) -> Self {
        self.state.lock().unwrap().balances.insert(address.to_string(), balance);
        self
    }

    pub fn with_utxos(self, address: &str, utxos: Vec<Utxo>) -> Self {
        self.state.lock().unwrap().utxos.insert(address.to_string(), utxos);
        self
    }

    pub fn with_fees(self, fast_fee: f64, min_fee: f64) -> Self {
        self.state.lock().unwrap().fees = Some(FeeEstimate { fast_fee, min_fee });
        self
    }

    pub fn with_rune(mut self, rune: RuneInfo) -> Self {
        self.add_capability(Capability::Runes);
        self.state.lock().unwrap().runes.insert(rune.id.clone(), rune);
        self
    }

    pub fn with_rune_outpoints(mut self, address: &str, rune_id: &str, outpoints: Vec<RuneOutpoint>) -> Self {
        self.add_capability(Capability::Runes);
        self.state
            .lock()
            .unwrap()
            .rune_outpoints
            .insert(format!("{address}/{rune_id}"), outpoints);
        self
    }

    pub fn with_alkanes(mut self, address: &str, outpoints: Vec<AlkaneOutpoint>) -> Self {
        self.add_capability(Capability::Alkanes);
        self.state.lock().unwrap().alkanes.insert(address.to_string(), outpoints);
        self
    }

    pub fn with_inscriptions(mut self, address: &str, inscriptions: Vec<Inscription>) -> Self {
        self.add_capability(Capability::Inscriptions);
        self.state
            .lock()
            .unwrap()
            .inscriptions
            .insert(address.to_string(), inscriptions);
        self
    }

    pub fn with_meta_balances(mut self, address: &str, protocol: Protocol, balances: Vec<MetaBalance>) -> Self {
        self.add_capability(Capability::for_protocol(protocol));
        self.state
            .lock()
            .unwrap()
            .meta_balances
            .insert(format!("{address}/{protocol}"), balances);
        self
    }

    pub fn insert_transaction(&self, tx: TransactionInfo) {
        self.state.lock().unwrap().transactions.insert(tx.txid.clone(), tx);
    }

    /// Number of trait calls served, failed ones included.
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    /// Raw hex of every broadcast transaction, in order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// Decoded form of every broadcast transaction.
    pub fn broadcast_transactions(&self) -> Vec<Transaction> {
        self.broadcasts()
            .iter()
            .map(|hex_tx| bitcoin::consensus::deserialize(&hex::decode(hex_tx).unwrap()).unwrap())
            .collect()
    }

    fn enter(&self) -> Result<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if self.failing {
            return Err(LaserEyesError::Network(format!("{} is unavailable", self.name)));
        }
        Ok(state)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DataSource for MockDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn get_address_utxos(&self, _network: NetworkType, address: &str) -> Result<Vec<Utxo>> {
        Ok(self.enter()?.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_balance(&self, _network: NetworkType, address: &str) -> Result<u64> {
        let state = self.enter()?;
        Ok(state.balances.get(address).copied().unwrap_or_else(|| {
            state
                .utxos
                .get(address)
                .map(|utxos| utxos.iter().map(|u| u.value).sum())
                .unwrap_or(0)
        }))
    }

    async fn get_transaction(&self, _network: NetworkType, txid: &str) -> Result<Option<TransactionInfo>> {
        Ok(self.enter()?.transactions.get(txid).cloned())
    }

    async fn get_recommended_fees(&self, _network: NetworkType) -> Result<FeeEstimate> {
        Ok(self.enter()?.fees.unwrap_or(FeeEstimate {
            fast_fee: 10.0,
            min_fee: 1.0,
        }))
    }

    async fn broadcast_transaction(&self, _network: NetworkType, tx_hex: &str) -> Result<String> {
        let mut state = self.enter()?;
        let tx: Transaction = bitcoin::consensus::deserialize(&hex::decode(tx_hex)?)?;
        let txid = tx.compute_txid().to_string();
        state.broadcasts.push(tx_hex.to_string());
        if self.auto_confirm {
            let outputs = tx
                .output
                .iter()
                .map(|out| TxOutputInfo {
                    value: out.value.to_sat(),
                    script_pub_key: hex::encode(out.script_pubkey.as_bytes()),
                    address: None,
                })
                .collect();
            state.transactions.insert(
                txid.clone(),
                TransactionInfo {
                    txid: txid.clone(),
                    confirmed: true,
                    block_height: Some(1),
                    outputs,
                },
            );
        }
        Ok(txid)
    }

    async fn get_inscriptions(
        &self,
        _network: NetworkType,
        address: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Inscription>> {
        let state = self.enter()?;
        Ok(state
            .inscriptions
            .get(address)
            .map(|all| all.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_meta_balances(&self, _network: NetworkType, address: &str, protocol: Protocol) -> Result<Vec<MetaBalance>> {
        Ok(self
            .enter()?
            .meta_balances
            .get(&format!("{address}/{protocol}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_rune_by_id(&self, _network: NetworkType, rune_id: &str) -> Result<RuneInfo> {
        self.enter()?
            .runes
            .get(rune_id)
            .cloned()
            .ok_or_else(|| LaserEyesError::AssetNotFound(format!("rune {rune_id}")))
    }

    async fn get_rune_outpoints(&self, _network: NetworkType, address: &str, rune_id: &str) -> Result<Vec<RuneOutpoint>> {
        Ok(self
            .enter()?
            .rune_outpoints
            .get(&format!("{address}/{rune_id}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_alkanes_by_address(&self, _network: NetworkType, address: &str) -> Result<Vec<AlkaneOutpoint>> {
        Ok(self.enter()?.alkanes.get(address).cloned().unwrap_or_default())
    }
}

type Handler = Arc<dyn Fn(&JsonValue) -> core::result::Result<JsonValue, BridgeError> + Send + Sync>;

#[derive(Default)]
struct WalletState {
    handlers: HashMap<String, Handler>,
    calls: Vec<(String, JsonValue)>,
}

/// Injected wallet answering from canned responses and recording calls.
#[derive(Clone, Default)]
pub struct MockWallet {
    state: Arc<Mutex<WalletState>>,
    rejecting: bool,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, method: &str, response: JsonValue) -> Self {
        self.handle(method, move |_| Ok(response.clone()))
    }

    pub fn handle(
        self,
        method: &str,
        handler: impl Fn(&JsonValue) -> core::result::Result<JsonValue, BridgeError> + Send + Sync + 'static,
    ) -> Self {
        self.state
            .lock()
            .unwrap()
            .handlers
            .insert(method.to_string(), Arc::new(handler));
        self
    }

    /// Every call is declined by the user.
    pub fn rejecting(mut self) -> Self {
        self.rejecting = true;
        self
    }

    /// A UniSat-style wallet for [`test_account`] that really signs
    /// `signPsbt(hex, options)` with the test keys.
    pub fn unisat_signer(network: NetworkType) -> Self {
        let account = test_account(network);
        let chain = match network {
            NetworkType::Testnet => "BITCOIN_TESTNET",
            NetworkType::Testnet4 => "BITCOIN_TESTNET4",
            NetworkType::Signet => "BITCOIN_SIGNET",
            _ => "BITCOIN_MAINNET",
        };
        MockWallet::new()
            .respond("requestAccounts", json!([account.address]))
            .respond("getChain", json!({ "enum": chain }))
            .respond("getPublicKey", json!(account.public_key))
            .handle("signPsbt", |params| {
                let hex_psbt = params[0].as_str().unwrap_or_default();
                let mut psbt = EncodedPsbt::from_hex(hex_psbt)
                    .and_then(|p| p.to_psbt())
                    .map_err(|e| BridgeError::new(None, e.to_string()))?;
                sign_with_test_keys(&mut psbt).map_err(|e| BridgeError::new(None, e.to_string()))?;
                Ok(json!(EncodedPsbt::from_psbt(&psbt).hex))
            })
    }

    pub fn calls(&self) -> Vec<(String, JsonValue)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls().iter().filter(|(m, _)| m == method).count()
    }

    /// Parameters of the most recent call to `method`.
    pub fn params_of(&self, method: &str) -> Option<JsonValue> {
        self.calls()
            .into_iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl InjectedWallet for MockWallet {
    async fn call(&self, method: &str, params: JsonValue) -> core::result::Result<JsonValue, BridgeError> {
        let handler = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((method.to_string(), params.clone()));
            state.handlers.get(method).cloned()
        };
        if self.rejecting {
            return Err(BridgeError::new(Some(4001), "User rejected the request"));
        }
        match handler {
            Some(handler) => handler(&params),
            None => Err(BridgeError::new(None, format!("no mock response for {method}"))),
        }
    }
}

/// Host whose wallet globals are installed by the test.
#[derive(Clone, Default)]
pub struct MockExtensionHost {
    globals: Arc<Mutex<HashMap<String, Arc<dyn InjectedWallet>>>>,
}

impl MockExtensionHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, provider: ProviderId, bridge: Arc<dyn InjectedWallet>) {
        self.globals
            .lock()
            .unwrap()
            .insert(provider.global_name().to_string(), bridge);
    }

    pub fn with_wallet(self, provider: ProviderId, bridge: Arc<dyn InjectedWallet>) -> Self {
        self.install(provider, bridge);
        self
    }
}

impl ExtensionHost for MockExtensionHost {
    fn lookup(&self, global: &str) -> Option<Arc<dyn InjectedWallet>> {
        self.globals.lock().unwrap().get(global).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_addresses_match_the_network() {
        let mainnet = test_account(NetworkType::Mainnet);
        assert!(mainnet.address.starts_with("bc1p"));
        assert!(mainnet.payment_address.starts_with("bc1q"));
        let testnet = test_account(NetworkType::Testnet4);
        assert!(testnet.address.starts_with("tb1p"));
    }

    #[test]
    fn test_keys_sign_the_test_psbt() {
        let mut psbt = test_psbt().to_psbt().unwrap();
        assert_eq!(sign_with_test_keys(&mut psbt).unwrap(), 1);
        assert_eq!(psbt.inputs[0].final_script_witness.as_ref().unwrap().len(), 2);
    }
}
