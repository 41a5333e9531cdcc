//! Transaction builders.
//!
//! Builders are pure: they take already fetched UTXOs, asset outpoints and
//! fee rates and return an unsigned PSBT. The `create_*` wrappers in each
//! submodule fetch their inputs through the [`DataSourceManager`] first.
//!
//! [`DataSourceManager`]: crate::datasource::DataSourceManager

pub mod alkanes;
pub mod brc20;
pub mod btc;
pub mod inscriptions;
pub mod protostone;
pub mod runes;
pub mod select;

pub use alkanes::{build_alkanes_send_psbt, create_alkanes_send_psbt};
pub use brc20::{brc20_transfer_content, Brc20Transfer};
pub use btc::{build_btc_send_psbt, create_btc_send_psbt};
pub use inscriptions::{build_inscription_send_psbt, InscriptionInput};
pub use runes::{build_rune_send_psbt, create_rune_send_psbt};
pub use select::{select_utxos, spendable_utxos};

use crate::network::NetworkType;
use crate::psbt::EncodedPsbt;
use crate::types::Utxo;
use crate::wallet::WalletAccount;
use crate::{LaserEyesError, Result};
use bitcoin::absolute::LockTime;
use bitcoin::address::AddressType;
use bitcoin::psbt::{Input, Psbt};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
    XOnlyPublicKey,
};

/// Smallest output value the builders create.
pub const DUST_LIMIT: u64 = 546;

/// Floor applied to token-send fees.
pub const MIN_RELAY_FEE: u64 = 250;

/// Virtual size estimate from input and output counts.
pub fn estimate_tx_size(taproot_inputs: usize, non_taproot_inputs: usize, outputs: usize) -> u64 {
    10 + 57 * taproot_inputs as u64 + 41 * non_taproot_inputs as u64 + 34 * outputs as u64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeePolicy {
    /// Absolute fee in sats.
    Fixed(u64),
    /// Sats per virtual byte, applied to the estimated size.
    Rate(f64),
}

impl FeePolicy {
    pub fn fee_for(&self, vsize: u64) -> u64 {
        match *self {
            FeePolicy::Fixed(fee) => fee,
            FeePolicy::Rate(rate) => (vsize as f64 * rate).ceil() as u64,
        }
    }
}

/// An unsigned PSBT plus the figures it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPsbt {
    pub psbt: EncodedPsbt,
    pub fee: u64,
    pub inputs: Vec<OutPoint>,
    pub change: Option<u64>,
}

/// One input as the builders see it: what it spends and who owns it.
#[derive(Debug, Clone)]
pub(crate) struct SpendInput {
    pub outpoint: OutPoint,
    pub prevout: TxOut,
    pub public_key: String,
}

impl SpendInput {
    /// Resolves a provider UTXO owned by `owner`. The owner's script stands
    /// in when the provider did not report one.
    pub fn from_utxo(utxo: &Utxo, owner: &Address, public_key: &str) -> Result<Self> {
        Self::new(&utxo.txid, utxo.vout, utxo.value, &utxo.script_pub_key, owner, public_key)
    }

    pub fn new(txid: &str, vout: u32, value: u64, script_hex: &str, owner: &Address, public_key: &str) -> Result<Self> {
        let script_pubkey = if script_hex.is_empty() {
            owner.script_pubkey()
        } else {
            ScriptBuf::from_hex(script_hex)
                .map_err(|e| LaserEyesError::Transaction(format!("bad script for {txid}:{vout}: {e}")))?
        };
        Ok(Self {
            outpoint: Utxo::new(txid, vout, value).outpoint()?,
            prevout: TxOut {
                value: Amount::from_sat(value),
                script_pubkey,
            },
            public_key: public_key.to_string(),
        })
    }

    pub fn is_taproot(&self) -> bool {
        self.prevout.script_pubkey.is_p2tr()
    }

    pub fn value(&self) -> u64 {
        self.prevout.value.to_sat()
    }
}

/// Size estimate for a set of inputs and an output count.
pub(crate) fn estimate_for(inputs: &[SpendInput], outputs: usize) -> u64 {
    let taproot = inputs.iter().filter(|i| i.is_taproot()).count();
    estimate_tx_size(taproot, inputs.len() - taproot, outputs)
}

/// X-only key from a 32-byte x-only or 33-byte compressed hex key.
pub fn x_only_key(public_key: &str) -> Result<XOnlyPublicKey> {
    let bytes = hex::decode(public_key)?;
    match bytes.len() {
        32 => Ok(XOnlyPublicKey::from_slice(&bytes)?),
        _ => Ok(PublicKey::from_slice(&bytes)?.inner.x_only_public_key().0),
    }
}

/// Fills the signing metadata a wallet needs for one input, chosen by the
/// type of the output being spent.
pub fn populate_input(
    input: &mut Input,
    network: NetworkType,
    prevout: TxOut,
    public_key: &str,
) -> Result<()> {
    let address_type = Address::from_script(&prevout.script_pubkey, network.bitcoin_network())
        .ok()
        .and_then(|a| a.address_type());
    match address_type {
        Some(AddressType::P2tr) => {
            input.tap_internal_key = Some(x_only_key(public_key)?);
        }
        Some(AddressType::P2sh) => {
            let key = CompressedPublicKey::from_slice(&hex::decode(public_key)?)
                .map_err(|e| LaserEyesError::Wallet(format!("invalid public key: {e}")))?;
            input.redeem_script = Some(ScriptBuf::new_p2wpkh(&key.wpubkey_hash()));
        }
        Some(AddressType::P2pkh) => {
            log::warn!("[TransactionBuilder] Legacy input needs the full previous transaction to be signed");
        }
        _ => {}
    }
    input.witness_utxo = Some(prevout);
    Ok(())
}

/// Assembles an unsigned PSBT and populates every input.
pub(crate) fn assemble_psbt(network: NetworkType, inputs: &[SpendInput], outputs: Vec<TxOut>) -> Result<Psbt> {
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    };
    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    for (slot, input) in psbt.inputs.iter_mut().zip(inputs) {
        populate_input(slot, network, input.prevout.clone(), &input.public_key)?;
    }
    Ok(psbt)
}

pub(crate) fn output_to(address: &Address, value: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey: address.script_pubkey(),
    }
}

/// Parsed sender addresses of an account.
pub(crate) struct Sender {
    pub ordinals: Address,
    pub payment: Address,
}

impl Sender {
    pub fn new(network: NetworkType, account: &WalletAccount) -> Result<Self> {
        Ok(Self {
            ordinals: network.parse_address(&account.address)?,
            payment: network.parse_address(&account.payment_address)?,
        })
    }
}

/// Picks payment UTXOs for a transaction that already spends `fixed`
/// inputs, recomputing the fee as inputs are added. Candidates that are
/// themselves among `fixed` are skipped, which matters when the payment and
/// ordinals addresses are the same. Returns the selected inputs and the fee.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fund_with_payment_utxos(
    fixed: &[SpendInput],
    fixed_value: u64,
    candidates: Vec<Utxo>,
    payment: &Address,
    payment_public_key: &str,
    outputs: usize,
    needed: u64,
    fee_for: impl Fn(u64) -> u64,
) -> Result<(Vec<SpendInput>, u64)> {
    let spendable: Vec<Utxo> = spendable_utxos(candidates, DUST_LIMIT)
        .into_iter()
        .filter(|u| !u.outpoint().is_ok_and(|o| fixed.iter().any(|f| f.outpoint == o)))
        .collect();
    let available: u64 = fixed_value + spendable.iter().map(|u| u.value).sum::<u64>();

    let mut funding: Vec<SpendInput> = Vec::new();
    let mut total = fixed_value;
    let fee_with = |funding: &[SpendInput]| {
        let mut all = fixed.to_vec();
        all.extend_from_slice(funding);
        fee_for(estimate_for(&all, outputs))
    };

    let mut fee = fee_with(&funding);
    if total >= needed + fee {
        return Ok((funding, fee));
    }
    for utxo in &spendable {
        funding.push(SpendInput::from_utxo(utxo, payment, payment_public_key)?);
        total += utxo.value;
        fee = fee_with(&funding);
        if total >= needed + fee {
            return Ok((funding, fee));
        }
    }
    Err(LaserEyesError::InsufficientFunds {
        required: needed + fee,
        available,
    })
}
