//! Moving inscriptions between addresses.

use super::{assemble_psbt, fund_with_payment_utxos, output_to, BuiltPsbt, Sender, SpendInput, DUST_LIMIT};
use crate::network::NetworkType;
use crate::psbt::EncodedPsbt;
use crate::types::{Inscription, Utxo};
use crate::wallet::WalletAccount;
use crate::{LaserEyesError, Result};

/// An output currently holding an inscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InscriptionInput {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    /// Hex; empty means the sender's ordinals address.
    pub script_pub_key: String,
}

impl InscriptionInput {
    pub fn new(txid: impl Into<String>, vout: u32, value: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            value,
            script_pub_key: String::new(),
        }
    }

    /// Location of a listed inscription. Providers that omit the output
    /// value are assumed to hold it on a dust output.
    pub fn from_inscription(inscription: &Inscription) -> Result<Self> {
        let (txid, vout) = inscription
            .output
            .rsplit_once(':')
            .ok_or_else(|| LaserEyesError::AssetNotFound(format!("inscription {} has no output", inscription.id)))?;
        Ok(Self::new(txid, vout.parse()?, inscription.value.unwrap_or(DUST_LIMIT)))
    }
}

/// Sends each inscription to `to` on its own output, keeping the output
/// value, and pays the fee from payment UTXOs. Outputs follow the order
/// of `inscriptions`.
pub fn build_inscription_send_psbt(
    network: NetworkType,
    account: &WalletAccount,
    inscriptions: &[InscriptionInput],
    payment_utxos: Vec<Utxo>,
    to: &str,
    fee_rate: f64,
) -> Result<BuiltPsbt> {
    if inscriptions.is_empty() {
        return Err(LaserEyesError::AssetNotFound("no inscriptions to send".to_string()));
    }
    let recipient = network.parse_address(to)?;
    let sender = Sender::new(network, account)?;

    let inscription_inputs = inscriptions
        .iter()
        .map(|i| SpendInput::new(&i.txid, i.vout, i.value, &i.script_pub_key, &sender.ordinals, &account.public_key))
        .collect::<Result<Vec<_>>>()?;
    let carried: u64 = inscriptions.iter().map(|i| i.value).sum();

    let (funding, fee) = fund_with_payment_utxos(
        &inscription_inputs,
        carried,
        payment_utxos,
        &sender.payment,
        &account.payment_public_key,
        inscriptions.len() + 1,
        carried,
        |vsize| (vsize as f64 * fee_rate).ceil() as u64,
    )?;

    let mut inputs = inscription_inputs;
    inputs.extend(funding);
    let total: u64 = inputs.iter().map(SpendInput::value).sum();
    let leftover = total - carried - fee;

    let mut outputs: Vec<_> = inscriptions.iter().map(|i| output_to(&recipient, i.value)).collect();
    let change = if leftover > DUST_LIMIT {
        outputs.push(output_to(&sender.payment, leftover));
        Some(leftover)
    } else {
        None
    };
    let psbt = assemble_psbt(network, &inputs, outputs)?;

    log::info!(
        "[TransactionBuilder] Sending {} inscriptions to {}, fee {}",
        inscriptions.len(),
        to,
        fee
    );
    Ok(BuiltPsbt {
        psbt: EncodedPsbt::from_psbt(&psbt),
        fee: if change.is_some() { fee } else { fee + leftover },
        inputs: inputs.iter().map(|i| i.outpoint).collect(),
        change,
    })
}
