//! Alkanes transfers.
//!
//! Output layout: 546 sats to the sender at 0 (protostone pointer and
//! refund), 546 sats to the recipient at 1 (the edict target), the
//! protostone runestone at 2, then change.

use super::protostone::{protostone_script, Protostone};
use super::{
    assemble_psbt, fund_with_payment_utxos, output_to, BuiltPsbt, Sender, SpendInput, DUST_LIMIT, MIN_RELAY_FEE,
};
use crate::datasource::DataSourceManager;
use crate::network::NetworkType;
use crate::psbt::EncodedPsbt;
use crate::types::{AlkaneId, AlkaneOutpoint, Utxo};
use crate::wallet::WalletAccount;
use crate::{LaserEyesError, Result};
use bitcoin::{Amount, TxOut};

const ALKANES_SEND_OUTPUTS: usize = 4;
const SENDER_OUTPUT: u32 = 0;
const RECIPIENT_OUTPUT: u32 = 1;

/// Gathers outpoints holding `id`, largest holding first, until their
/// combined balance reaches `amount`.
pub fn find_alkane_outpoints(
    id: &AlkaneId,
    outpoints: Vec<AlkaneOutpoint>,
    amount: u128,
) -> Result<Vec<AlkaneOutpoint>> {
    let mut holding: Vec<(u128, AlkaneOutpoint)> = outpoints
        .into_iter()
        .map(|o| (o.balance_of(id), o))
        .filter(|(balance, _)| *balance > 0)
        .collect();
    if holding.is_empty() {
        return Err(LaserEyesError::NoAlkaneFound(id.to_string()));
    }
    holding.sort_by(|a, b| b.0.cmp(&a.0));
    let available: u128 = holding.iter().map(|(balance, _)| balance).sum();

    let mut gathered = 0u128;
    let mut selected = Vec::new();
    for (balance, outpoint) in holding {
        if gathered >= amount {
            break;
        }
        gathered += balance;
        selected.push(outpoint);
    }
    if gathered < amount {
        return Err(LaserEyesError::InsufficientAssetBalance {
            asset: id.to_string(),
            required: amount,
            available,
        });
    }
    Ok(selected)
}

/// Builds an unsigned alkanes transfer of `amount` base units of `id`.
#[allow(clippy::too_many_arguments)]
pub fn build_alkanes_send_psbt(
    network: NetworkType,
    account: &WalletAccount,
    id: AlkaneId,
    outpoints: Vec<AlkaneOutpoint>,
    payment_utxos: Vec<Utxo>,
    to: &str,
    amount: u128,
    fee_rate: f64,
) -> Result<BuiltPsbt> {
    let recipient = network.parse_address(to)?;
    let sender = Sender::new(network, account)?;

    let alkane_inputs = find_alkane_outpoints(&id, outpoints, amount)?
        .iter()
        .map(|o| SpendInput::new(&o.txid, o.vout, o.value, &o.script_pub_key, &sender.ordinals, &account.public_key))
        .collect::<Result<Vec<_>>>()?;
    let alkane_sats: u64 = alkane_inputs.iter().map(SpendInput::value).sum();

    let (funding, fee) = fund_with_payment_utxos(
        &alkane_inputs,
        alkane_sats,
        payment_utxos,
        &sender.payment,
        &account.payment_public_key,
        ALKANES_SEND_OUTPUTS,
        2 * DUST_LIMIT,
        |vsize| ((vsize as f64 * fee_rate).ceil() as u64).max(MIN_RELAY_FEE),
    )?;

    let protostone = Protostone::transfer(id, amount, RECIPIENT_OUTPUT, SENDER_OUTPUT, SENDER_OUTPUT);

    let mut inputs = alkane_inputs;
    inputs.extend(funding);
    let total: u64 = inputs.iter().map(SpendInput::value).sum();
    let leftover = total - 2 * DUST_LIMIT - fee;

    let mut outputs = vec![
        output_to(&sender.ordinals, DUST_LIMIT),
        output_to(&recipient, DUST_LIMIT),
        TxOut {
            value: Amount::ZERO,
            script_pubkey: protostone_script(&[protostone])?,
        },
    ];
    let change = if leftover > DUST_LIMIT {
        outputs.push(output_to(&sender.payment, leftover));
        Some(leftover)
    } else {
        None
    };
    let psbt = assemble_psbt(network, &inputs, outputs)?;

    log::info!(
        "[TransactionBuilder] Alkanes send of {} {} to {} using {} inputs, fee {}",
        amount,
        id,
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

pub async fn create_alkanes_send_psbt(
    data_sources: &DataSourceManager,
    network: NetworkType,
    account: &WalletAccount,
    id: AlkaneId,
    to: &str,
    amount: u128,
    fee_rate: Option<f64>,
) -> Result<BuiltPsbt> {
    let (outpoints, utxos, fees) = futures::try_join!(
        data_sources.get_alkanes_by_address(network, &account.address, None),
        data_sources.get_address_utxos(network, &account.payment_address, None),
        data_sources.get_recommended_fees(network, None),
    )?;
    let rate = fee_rate.unwrap_or(fees.fast_fee);
    build_alkanes_send_psbt(network, account, id, outpoints, utxos, to, amount, rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{funding_utxo, test_account, test_txid};
    use crate::types::AlkaneBalance;

    const TOKEN: AlkaneId = AlkaneId { block: 2, tx: 1 };

    fn holding(account: &WalletAccount, seed: u8, id: AlkaneId, amount: u128) -> AlkaneOutpoint {
        let utxo = funding_utxo(NetworkType::Mainnet, &account.address, 546, seed);
        AlkaneOutpoint {
            txid: test_txid(seed),
            vout: 0,
            value: 546,
            script_pub_key: utxo.script_pub_key,
            alkanes: vec![AlkaneBalance {
                id,
                name: None,
                symbol: None,
                amount,
            }],
        }
    }

    #[test]
    fn outpoints_are_gathered_until_the_amount_is_reached() {
        let account = test_account(NetworkType::Mainnet);
        let outpoints = vec![
            holding(&account, 1, TOKEN, 30),
            holding(&account, 2, TOKEN, 50),
            holding(&account, 3, AlkaneId { block: 2, tx: 9 }, 1_000),
            holding(&account, 4, TOKEN, 40),
        ];
        let selected = find_alkane_outpoints(&TOKEN, outpoints, 80).unwrap();
        let txids: Vec<String> = selected.iter().map(|o| o.txid.clone()).collect();
        assert_eq!(txids, vec![test_txid(2), test_txid(4)]);
    }

    #[test]
    fn missing_alkane_is_not_found() {
        let account = test_account(NetworkType::Mainnet);
        let err = find_alkane_outpoints(&TOKEN, vec![holding(&account, 1, AlkaneId { block: 2, tx: 9 }, 5)], 1)
            .unwrap_err();
        assert!(matches!(err, LaserEyesError::NoAlkaneFound(_)));
        assert_eq!(err.kind(), crate::LaserEyesErrorKind::AssetNotFound);

        let err = find_alkane_outpoints(&TOKEN, vec![holding(&account, 1, TOKEN, 5)], 6).unwrap_err();
        assert!(matches!(err, LaserEyesError::InsufficientAssetBalance { available: 5, .. }));
    }

    #[test]
    fn transfer_outputs_follow_the_protostone_layout() {
        let account = test_account(NetworkType::Mainnet);
        let built = build_alkanes_send_psbt(
            NetworkType::Mainnet,
            &account,
            TOKEN,
            vec![holding(&account, 1, TOKEN, 100)],
            vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 10_000, 2)],
            &account.payment_address,
            60,
            1.0,
        )
        .unwrap();
        let tx = built.psbt.to_psbt().unwrap().unsigned_tx;
        assert_eq!(tx.output[0].value.to_sat(), 546);
        assert_eq!(tx.output[1].value.to_sat(), 546);
        assert_eq!(
            tx.output[2].script_pubkey,
            protostone_script(&[Protostone::transfer(TOKEN, 60, 1, 0, 0)]).unwrap()
        );
        assert_eq!(built.fee, MIN_RELAY_FEE);
        assert_eq!(built.change, Some(546 + 10_000 - 1_092 - 250));
    }
}
