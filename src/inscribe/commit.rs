//! Commit sizing and the commit transaction.
//!
//! The commit pays the reveal's funding to a taproot address whose single
//! leaf is the inscription script. Its size model is a flat per-output
//! weight scaled by the inscription count.

use super::envelope::{InscriptionContent, INSCRIPTION_POSTAGE};
use crate::builder::{assemble_psbt, output_to, select_utxos, BuiltPsbt, Sender, SpendInput, DUST_LIMIT};
use crate::network::NetworkType;
use crate::psbt::EncodedPsbt;
use crate::types::Utxo;
use crate::wallet::WalletAccount;
use crate::{LaserEyesError, Result};
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::taproot::{TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, ScriptBuf, XOnlyPublicKey};

/// Largest combined base64 content accepted for one commit.
pub const MAX_CONTENT_SIZE: usize = 390_000;

/// Commit funding UTXOs must be worth more than this.
pub const MIN_COMMIT_UTXO_VALUE: u64 = 3_000;

const REVEAL_FEE_BUFFER: u64 = 1_000;
const COMMIT_OUTPUT_WEIGHT: u64 = 5 * 34;

/// Satoshis an inscription batch needs, split by transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitCost {
    /// Combined base64 length of the contents.
    pub content_size: u64,
    pub estimated_size: u64,
    /// Paid as fee by the commit.
    pub commit_sats: u64,
    /// Locked in commit output 0 and spent by the reveal.
    pub reveal_sats: u64,
    pub total: u64,
}

pub fn content_size(contents: &[InscriptionContent]) -> usize {
    contents.iter().map(|c| c.content_base64.len()).sum()
}

/// Cost of inscribing `contents` at `fee_rate` sat/vB.
pub fn calculate_commit_cost(contents: &[InscriptionContent], fee_rate: f64) -> Result<CommitCost> {
    let size = content_size(contents);
    if size > MAX_CONTENT_SIZE {
        return Err(LaserEyesError::ContentTooLarge {
            size,
            max: MAX_CONTENT_SIZE,
        });
    }
    if contents.is_empty() {
        return Err(LaserEyesError::Transaction("nothing to inscribe".to_string()));
    }
    let count = contents.len() as u64;
    let estimated_size = COMMIT_OUTPUT_WEIGHT * count;
    let commit_sats = (estimated_size as f64 * fee_rate * count as f64).floor() as u64;
    let reveal_sats =
        (size as f64 * fee_rate / 3.0).floor() as u64 + REVEAL_FEE_BUFFER + INSCRIPTION_POSTAGE * count;
    Ok(CommitCost {
        content_size: size as u64,
        estimated_size,
        commit_sats,
        reveal_sats,
        total: commit_sats + reveal_sats,
    })
}

/// Taproot tree with the inscription script as its only leaf.
pub fn commit_spend_info<C: Verification>(
    secp: &Secp256k1<C>,
    internal_key: XOnlyPublicKey,
    script: &ScriptBuf,
) -> Result<TaprootSpendInfo> {
    TaprootBuilder::new()
        .add_leaf(0, script.clone())?
        .finalize(secp, internal_key)
        .map_err(|_| LaserEyesError::Transaction("inscription taproot tree is incomplete".to_string()))
}

pub fn commit_address(network: NetworkType, spend_info: &TaprootSpendInfo) -> Address {
    Address::p2tr_tweaked(spend_info.output_key(), network.bitcoin_network())
}

/// Builds the unsigned commit: `cost.reveal_sats` to `commit_address` at
/// output 0, change above dust back to the payment address.
pub fn build_commit_psbt(
    network: NetworkType,
    account: &WalletAccount,
    commit_address: &Address,
    cost: &CommitCost,
    utxos: Vec<Utxo>,
) -> Result<BuiltPsbt> {
    let sender = Sender::new(network, account)?;
    let mut candidates: Vec<Utxo> = utxos
        .into_iter()
        .filter(|u| u.value > MIN_COMMIT_UTXO_VALUE && !u.carries_asset())
        .collect();
    candidates.sort_by(|a, b| b.value.cmp(&a.value));
    let available: u64 = candidates.iter().map(|u| u.value).sum();
    if available < cost.total {
        return Err(LaserEyesError::InsufficientFunds {
            required: cost.total,
            available,
        });
    }

    let selected = select_utxos(&candidates, |_, gathered| gathered > cost.total).unwrap_or(candidates);
    let inputs = selected
        .iter()
        .map(|u| SpendInput::from_utxo(u, &sender.payment, &account.payment_public_key))
        .collect::<Result<Vec<_>>>()?;
    let gathered: u64 = inputs.iter().map(SpendInput::value).sum();
    let leftover = gathered - cost.total;

    let mut outputs = vec![output_to(commit_address, cost.reveal_sats)];
    let change = if leftover > DUST_LIMIT {
        outputs.push(output_to(&sender.payment, leftover));
        Some(leftover)
    } else {
        None
    };
    let psbt = assemble_psbt(network, &inputs, outputs)?;

    log::info!(
        "[InscriptionEngine] Commit to {} funds reveal with {} sats from {} inputs",
        commit_address,
        cost.reveal_sats,
        inputs.len()
    );
    Ok(BuiltPsbt {
        psbt: EncodedPsbt::from_psbt(&psbt),
        fee: if change.is_some() { cost.commit_sats } else { cost.commit_sats + leftover },
        inputs: inputs.iter().map(|i| i.outpoint).collect(),
        change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inscribe::envelope::build_inscription_script;
    use crate::mock::{funding_utxo, test_account};
    use bitcoin::secp256k1::Keypair;

    fn content(len: usize) -> InscriptionContent {
        InscriptionContent::new("A".repeat(len), "text/plain")
    }

    #[test]
    fn cost_of_a_small_text_inscription() {
        let cost = calculate_commit_cost(&[content(100)], 10.0).unwrap();
        assert_eq!(cost.estimated_size, 170);
        assert_eq!(cost.commit_sats, 1_700);
        assert_eq!(cost.reveal_sats, 333 + 1_000 + 546);
        assert_eq!(cost.total, 3_579);
    }

    #[test]
    fn batch_cost_scales_with_count() {
        let cost = calculate_commit_cost(&[content(30), content(30)], 2.0).unwrap();
        assert_eq!(cost.estimated_size, 340);
        assert_eq!(cost.commit_sats, 1_360);
        assert_eq!(cost.reveal_sats, 40 + 1_000 + 1_092);
    }

    #[test]
    fn oversized_content_is_rejected() {
        let err = calculate_commit_cost(&[content(200_000), content(190_001)], 1.0).unwrap_err();
        assert!(matches!(err, LaserEyesError::ContentTooLarge { size: 390_001, .. }));
        assert!(calculate_commit_cost(&[content(MAX_CONTENT_SIZE)], 1.0).is_ok());
    }

    #[test]
    fn commit_pays_the_script_address_and_returns_change() {
        let account = test_account(NetworkType::Mainnet);
        let secp = Secp256k1::new();
        let key = Keypair::from_seckey_slice(&secp, &[5u8; 32]).unwrap().x_only_public_key().0;
        let script = build_inscription_script(&key, &[content(100)]).unwrap();
        let spend_info = commit_spend_info(&secp, key, &script).unwrap();
        let address = commit_address(NetworkType::Mainnet, &spend_info);
        let cost = calculate_commit_cost(&[content(100)], 10.0).unwrap();

        let utxos = vec![
            funding_utxo(NetworkType::Mainnet, &account.payment_address, 2_500, 1),
            funding_utxo(NetworkType::Mainnet, &account.payment_address, 10_000, 2),
            funding_utxo(NetworkType::Mainnet, &account.payment_address, 50_000, 3),
        ];
        let built = build_commit_psbt(NetworkType::Mainnet, &account, &address, &cost, utxos).unwrap();
        let tx = built.psbt.to_psbt().unwrap().unsigned_tx;
        assert_eq!(tx.input.len(), 1);
        assert_eq!(built.inputs[0].txid.to_string(), crate::mock::test_txid(3));
        assert_eq!(tx.output[0].value.to_sat(), cost.reveal_sats);
        assert_eq!(tx.output[0].script_pubkey, address.script_pubkey());
        assert_eq!(built.change, Some(50_000 - 3_579));
    }

    #[test]
    fn small_utxos_do_not_fund_a_commit() {
        let account = test_account(NetworkType::Mainnet);
        let secp = Secp256k1::new();
        let key = Keypair::from_seckey_slice(&secp, &[5u8; 32]).unwrap().x_only_public_key().0;
        let script = build_inscription_script(&key, &[content(100)]).unwrap();
        let address = commit_address(NetworkType::Mainnet, &commit_spend_info(&secp, key, &script).unwrap());
        let cost = calculate_commit_cost(&[content(100)], 10.0).unwrap();

        let err = build_commit_psbt(
            NetworkType::Mainnet,
            &account,
            &address,
            &cost,
            vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 2_000, 1)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LaserEyesError::InsufficientFunds {
                required: 3_579,
                available: 0
            }
        ));
    }
}
