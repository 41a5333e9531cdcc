//! Rune transfers.
//!
//! Output layout: runestone at 0, 546 sats back to the sender's ordinals
//! address at 1 (the runestone pointer, receiving any unallocated runes),
//! 546 sats to the recipient at 2 (the edict target), then change.

use super::{
    assemble_psbt, fund_with_payment_utxos, output_to, BuiltPsbt, Sender, SpendInput, DUST_LIMIT, MIN_RELAY_FEE,
};
use crate::datasource::DataSourceManager;
use crate::network::NetworkType;
use crate::psbt::EncodedPsbt;
use crate::types::{RuneInfo, RuneOutpoint, Utxo};
use crate::wallet::WalletAccount;
use crate::{LaserEyesError, Result};
use bitcoin::{Amount, TxOut};
use core::str::FromStr;
use ordinals::{Edict, RuneId, Runestone};

const RUNE_SEND_OUTPUTS: usize = 4;
const SENDER_OUTPUT: u32 = 1;
const RECIPIENT_OUTPUT: u32 = 2;

/// Converts a decimal amount such as `"12.5"` to base units. Fractional
/// digits beyond `divisibility` are rejected rather than rounded.
pub fn parse_rune_amount(amount: &str, divisibility: u8) -> Result<u128> {
    let invalid = || LaserEyesError::MalformedAmount(amount.to_string());
    let (whole, fraction) = match amount.trim().split_once('.') {
        Some((whole, fraction)) => (whole, fraction.trim_end_matches('0')),
        None => (amount.trim(), ""),
    };
    if fraction.len() > divisibility as usize || (whole.is_empty() && fraction.is_empty()) {
        return Err(invalid());
    }
    let scale = 10u128
        .checked_pow(u32::from(divisibility))
        .ok_or_else(invalid)?;
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let fraction_units: u128 = if fraction.is_empty() {
        0
    } else {
        let digits: u128 = fraction.parse().map_err(|_| invalid())?;
        digits * 10u128.pow(u32::from(divisibility) - fraction.len() as u32)
    };
    whole
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction_units))
        .ok_or_else(invalid)
}

/// Picks rune outpoints, largest balance first, until `amount` is covered.
fn select_rune_outpoints(rune_id: &str, mut outpoints: Vec<RuneOutpoint>, amount: u128) -> Result<Vec<RuneOutpoint>> {
    outpoints.sort_by(|a, b| b.balance.cmp(&a.balance));
    let available: u128 = outpoints.iter().map(|o| o.balance).sum();
    let mut gathered = 0u128;
    let mut selected = Vec::new();
    for outpoint in outpoints.into_iter().filter(|o| o.balance > 0) {
        if gathered >= amount {
            break;
        }
        gathered += outpoint.balance;
        selected.push(outpoint);
    }
    if gathered < amount {
        return Err(LaserEyesError::InsufficientAssetBalance {
            asset: rune_id.to_string(),
            required: amount,
            available,
        });
    }
    Ok(selected)
}

/// Builds an unsigned rune transfer. `amount` is a decimal in display
/// units of `rune`.
#[allow(clippy::too_many_arguments)]
pub fn build_rune_send_psbt(
    network: NetworkType,
    account: &WalletAccount,
    rune: &RuneInfo,
    outpoints: Vec<RuneOutpoint>,
    payment_utxos: Vec<Utxo>,
    to: &str,
    amount: &str,
    fee_rate: f64,
) -> Result<BuiltPsbt> {
    let recipient = network.parse_address(to)?;
    let sender = Sender::new(network, account)?;
    let rune_id =
        RuneId::from_str(&rune.id).map_err(|e| LaserEyesError::AssetNotFound(format!("rune {}: {e}", rune.id)))?;
    let units = parse_rune_amount(amount, rune.divisibility)?;

    let rune_inputs = select_rune_outpoints(&rune.id, outpoints, units)?
        .iter()
        .map(|o| SpendInput::new(&o.txid, o.vout, o.value, &o.script_pub_key, &sender.ordinals, &account.public_key))
        .collect::<Result<Vec<_>>>()?;
    let rune_sats: u64 = rune_inputs.iter().map(SpendInput::value).sum();

    let (funding, fee) = fund_with_payment_utxos(
        &rune_inputs,
        rune_sats,
        payment_utxos,
        &sender.payment,
        &account.payment_public_key,
        RUNE_SEND_OUTPUTS,
        2 * DUST_LIMIT,
        |vsize| ((vsize as f64 * fee_rate).ceil() as u64).max(MIN_RELAY_FEE),
    )?;

    let runestone = Runestone {
        edicts: vec![Edict {
            id: rune_id,
            amount: units,
            output: RECIPIENT_OUTPUT,
        }],
        pointer: Some(SENDER_OUTPUT),
        ..Default::default()
    };

    let mut inputs = rune_inputs;
    inputs.extend(funding);
    let total: u64 = inputs.iter().map(SpendInput::value).sum();
    let leftover = total - 2 * DUST_LIMIT - fee;

    let mut outputs = vec![
        TxOut {
            value: Amount::ZERO,
            script_pubkey: runestone.encipher(),
        },
        output_to(&sender.ordinals, DUST_LIMIT),
        output_to(&recipient, DUST_LIMIT),
    ];
    let change = if leftover > DUST_LIMIT {
        outputs.push(output_to(&sender.payment, leftover));
        Some(leftover)
    } else {
        None
    };
    let psbt = assemble_psbt(network, &inputs, outputs)?;

    log::info!(
        "[TransactionBuilder] Rune send of {} {} to {} using {} inputs, fee {}",
        amount,
        rune.name,
        to,
        inputs.len(),
        fee
    );
    Ok(BuiltPsbt {
        psbt: EncodedPsbt::from_psbt(&psbt),
        fee: if change.is_some() { fee } else { fee + leftover },
        inputs: inputs.iter().map(|i| i.outpoint).collect(),
        change,
    })
}

/// Resolves the rune, its outpoints at the ordinals address, the payment
/// UTXOs and fees, then builds the transfer.
pub async fn create_rune_send_psbt(
    data_sources: &DataSourceManager,
    network: NetworkType,
    account: &WalletAccount,
    rune_id: &str,
    to: &str,
    amount: &str,
    fee_rate: Option<f64>,
) -> Result<BuiltPsbt> {
    let (rune, outpoints, utxos, fees) = futures::try_join!(
        data_sources.get_rune_by_id(network, rune_id, None),
        data_sources.get_rune_outpoints(network, &account.address, rune_id, None),
        data_sources.get_address_utxos(network, &account.payment_address, None),
        data_sources.get_recommended_fees(network, None),
    )?;
    let rate = fee_rate.unwrap_or(fees.fast_fee);
    build_rune_send_psbt(network, account, &rune, outpoints, utxos, to, amount, rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{funding_utxo, test_account, test_txid};

    fn rune() -> RuneInfo {
        RuneInfo {
            id: "840000:3".to_string(),
            name: "DOG•GO•TO•THE•MOON".to_string(),
            divisibility: 5,
            symbol: Some("🐕".to_string()),
        }
    }

    fn rune_outpoint(account: &WalletAccount, seed: u8, balance: u128) -> RuneOutpoint {
        let utxo = funding_utxo(NetworkType::Mainnet, &account.address, 546, seed);
        RuneOutpoint {
            txid: test_txid(seed),
            vout: 0,
            value: 546,
            script_pub_key: utxo.script_pub_key,
            balance,
        }
    }

    #[test]
    fn decimal_amounts_scale_by_divisibility() {
        assert_eq!(parse_rune_amount("12.5", 5).unwrap(), 1_250_000);
        assert_eq!(parse_rune_amount("3", 0).unwrap(), 3);
        assert_eq!(parse_rune_amount(".25", 2).unwrap(), 25);
        assert_eq!(parse_rune_amount("1.50", 1).unwrap(), 15);
        assert!(parse_rune_amount("0.001", 2).is_err());
        assert!(parse_rune_amount("abc", 2).is_err());
    }

    #[test]
    fn transfer_lays_out_runestone_sender_recipient_change() {
        let account = test_account(NetworkType::Mainnet);
        let to = test_account(NetworkType::Mainnet).payment_address;
        let built = build_rune_send_psbt(
            NetworkType::Mainnet,
            &account,
            &rune(),
            vec![rune_outpoint(&account, 1, 500_000), rune_outpoint(&account, 2, 2_000_000)],
            vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 20_000, 3)],
            &to,
            "10",
            2.0,
        )
        .unwrap();

        let psbt = built.psbt.to_psbt().unwrap();
        let tx = &psbt.unsigned_tx;
        // one rune outpoint covers the 1_000_000 units, plus one payment input
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.input[0].previous_output.txid.to_string(), test_txid(2));
        assert!(psbt.inputs[0].tap_internal_key.is_some());

        assert_eq!(tx.output.len(), 4);
        assert!(tx.output[0].script_pubkey.is_op_return());
        assert_eq!(tx.output[0].value, Amount::ZERO);
        assert_eq!(tx.output[1].value.to_sat(), 546);
        assert_eq!(tx.output[2].value.to_sat(), 546);
        assert_eq!(tx.output[3].script_pubkey, NetworkType::Mainnet.parse_address(&account.payment_address).unwrap().script_pubkey());

        let artifact = Runestone::decipher(tx).unwrap();
        let ordinals::Artifact::Runestone(runestone) = artifact else {
            panic!("expected a runestone");
        };
        assert_eq!(runestone.pointer, Some(1));
        assert_eq!(runestone.edicts[0].amount, 1_000_000);
        assert_eq!(runestone.edicts[0].output, 2);

        // 10 + 57 + 41 + 4 * 34 = 244 vB at 2 sat/vB
        assert_eq!(built.fee, 488);
        assert_eq!(built.change, Some(546 + 20_000 - 1_092 - 488));
    }

    #[test]
    fn fee_never_drops_below_the_relay_floor() {
        let account = test_account(NetworkType::Mainnet);
        let built = build_rune_send_psbt(
            NetworkType::Mainnet,
            &account,
            &rune(),
            vec![rune_outpoint(&account, 1, 500_000)],
            vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 20_000, 3)],
            &account.address,
            "1",
            0.5,
        )
        .unwrap();
        assert_eq!(built.fee, MIN_RELAY_FEE);
    }

    #[test]
    fn short_rune_balance_is_reported() {
        let account = test_account(NetworkType::Mainnet);
        let err = build_rune_send_psbt(
            NetworkType::Mainnet,
            &account,
            &rune(),
            vec![rune_outpoint(&account, 1, 100)],
            vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 20_000, 3)],
            &account.address,
            "1",
            1.0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LaserEyesError::InsufficientAssetBalance {
                required: 100_000,
                available: 100,
                ..
            }
        ));
    }

    #[test]
    fn single_address_wallet_never_spends_the_rune_outpoint_twice() {
        let full = test_account(NetworkType::Mainnet);
        let account = WalletAccount::single(full.address.clone(), full.public_key.clone());
        let held = funding_utxo(NetworkType::Mainnet, &account.address, 1_000, 1);
        let outpoint = RuneOutpoint {
            txid: held.txid.clone(),
            vout: held.vout,
            value: held.value,
            script_pub_key: held.script_pub_key.clone(),
            balance: 500_000,
        };
        // the provider lists the rune output again among plain UTXOs, unflagged
        let payment = vec![held, funding_utxo(NetworkType::Mainnet, &account.address, 800, 2)];

        let built = build_rune_send_psbt(
            NetworkType::Mainnet,
            &account,
            &rune(),
            vec![outpoint],
            payment,
            &full.payment_address,
            "1",
            1.0,
        )
        .unwrap();

        let spent: Vec<String> = built.inputs.iter().map(|o| o.to_string()).collect();
        assert_eq!(spent, vec![format!("{}:0", test_txid(1)), format!("{}:0", test_txid(2))]);
    }
}
