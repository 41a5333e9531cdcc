//! Plain BTC sends from the payment address.

use super::{
    assemble_psbt, estimate_for, estimate_tx_size, output_to, select_utxos, spendable_utxos, BuiltPsbt, FeePolicy,
    Sender, SpendInput, DUST_LIMIT,
};
use crate::datasource::DataSourceManager;
use crate::network::NetworkType;
use crate::psbt::EncodedPsbt;
use crate::types::Utxo;
use crate::wallet::WalletAccount;
use crate::{LaserEyesError, Result};

/// Number of outputs assumed while sizing: recipient and change.
const SEND_OUTPUTS: usize = 2;

/// Builds an unsigned PSBT paying `amount` to `to` from the account's
/// payment UTXOs. Inputs are taken largest first until they cover the
/// amount plus the fee for the inputs picked so far.
pub fn build_btc_send_psbt(
    network: NetworkType,
    account: &WalletAccount,
    utxos: Vec<Utxo>,
    to: &str,
    amount: u64,
    fee: FeePolicy,
) -> Result<BuiltPsbt> {
    if amount < DUST_LIMIT {
        return Err(LaserEyesError::InvalidAmount(amount));
    }
    let recipient = network.parse_address(to)?;
    let sender = Sender::new(network, account)?;

    let spendable = spendable_utxos(utxos, DUST_LIMIT);
    let available: u64 = spendable.iter().map(|u| u.value).sum();

    let mut last_fee = fee.fee_for(estimate_tx_size(0, 1, SEND_OUTPUTS));
    let mut resolve_error = None;
    let selected = select_utxos(&spendable, |selection, total| {
        let inputs: Result<Vec<SpendInput>> = selection
            .iter()
            .map(|u| SpendInput::from_utxo(u, &sender.payment, &account.payment_public_key))
            .collect();
        match inputs {
            Ok(inputs) => {
                last_fee = fee.fee_for(estimate_for(&inputs, SEND_OUTPUTS));
                total >= amount + last_fee
            }
            Err(e) => {
                resolve_error = Some(e);
                true
            }
        }
    });
    if let Some(e) = resolve_error {
        return Err(e);
    }
    let selected = selected.ok_or(LaserEyesError::InsufficientFunds {
        required: amount + last_fee,
        available,
    })?;

    let inputs = selected
        .iter()
        .map(|u| SpendInput::from_utxo(u, &sender.payment, &account.payment_public_key))
        .collect::<Result<Vec<_>>>()?;
    let total: u64 = inputs.iter().map(SpendInput::value).sum();
    let leftover = total - amount - last_fee;

    let mut outputs = vec![output_to(&recipient, amount)];
    let (change, fee_paid) = if leftover > DUST_LIMIT {
        outputs.push(output_to(&sender.payment, leftover));
        (Some(leftover), last_fee)
    } else {
        (None, last_fee + leftover)
    };
    let psbt = assemble_psbt(network, &inputs, outputs)?;

    log::info!(
        "[TransactionBuilder] BTC send of {} sats to {} using {} inputs, fee {}",
        amount,
        to,
        inputs.len(),
        fee_paid
    );
    Ok(BuiltPsbt {
        psbt: EncodedPsbt::from_psbt(&psbt),
        fee: fee_paid,
        inputs: inputs.iter().map(|i| i.outpoint).collect(),
        change,
    })
}

/// Fetches the payment UTXOs and fee rates concurrently, then builds the
/// send. `fee_rate` overrides the provider's fast fee.
pub async fn create_btc_send_psbt(
    data_sources: &DataSourceManager,
    network: NetworkType,
    account: &WalletAccount,
    to: &str,
    amount: u64,
    fee_rate: Option<f64>,
) -> Result<BuiltPsbt> {
    let (utxos, fees) = futures::try_join!(
        data_sources.get_address_utxos(network, &account.payment_address, None),
        data_sources.get_recommended_fees(network, None),
    )?;
    let rate = fee_rate.unwrap_or(fees.fast_fee);
    build_btc_send_psbt(network, account, utxos, to, amount, FeePolicy::Rate(rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{funding_utxo, test_account};

    fn recipient() -> String {
        test_account(NetworkType::Mainnet).address
    }

    #[test]
    fn greatest_first_selection_leaves_change() {
        let account = test_account(NetworkType::Mainnet);
        let utxos = vec![
            funding_utxo(NetworkType::Mainnet, &account.payment_address, 10_000, 1),
            funding_utxo(NetworkType::Mainnet, &account.payment_address, 50_000, 2),
        ];
        let built =
            build_btc_send_psbt(NetworkType::Mainnet, &account, utxos, &recipient(), 40_000, FeePolicy::Fixed(1_000))
                .unwrap();

        assert_eq!(built.inputs.len(), 1);
        assert_eq!(built.change, Some(9_000));
        assert_eq!(built.fee, 1_000);
        let psbt = built.psbt.to_psbt().unwrap();
        assert_eq!(psbt.unsigned_tx.input[0].previous_output.txid.to_string(), "02".repeat(32));
        let values: Vec<u64> = psbt.unsigned_tx.output.iter().map(|o| o.value.to_sat()).collect();
        assert_eq!(values, vec![40_000, 9_000]);
        assert!(psbt.inputs[0].witness_utxo.is_some());
    }

    #[test]
    fn change_at_dust_is_absorbed_into_the_fee() {
        let account = test_account(NetworkType::Mainnet);
        let utxos = vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 41_500, 1)];
        let built =
            build_btc_send_psbt(NetworkType::Mainnet, &account, utxos, &recipient(), 40_000, FeePolicy::Fixed(1_000))
                .unwrap();
        assert_eq!(built.change, None);
        assert_eq!(built.fee, 1_500);
        assert_eq!(built.psbt.to_psbt().unwrap().unsigned_tx.output.len(), 1);
    }

    #[test]
    fn amount_below_dust_is_rejected() {
        let account = test_account(NetworkType::Mainnet);
        let err = build_btc_send_psbt(NetworkType::Mainnet, &account, vec![], &recipient(), 545, FeePolicy::Fixed(0))
            .unwrap_err();
        assert!(matches!(err, LaserEyesError::InvalidAmount(545)));
    }

    #[test]
    fn asset_utxos_never_fund_a_send() {
        let account = test_account(NetworkType::Mainnet);
        let mut inscribed = funding_utxo(NetworkType::Mainnet, &account.payment_address, 100_000, 1);
        inscribed.has_inscription = Some(true);
        let utxos = vec![inscribed, funding_utxo(NetworkType::Mainnet, &account.payment_address, 5_000, 2)];
        let err =
            build_btc_send_psbt(NetworkType::Mainnet, &account, utxos, &recipient(), 40_000, FeePolicy::Fixed(1_000))
                .unwrap_err();
        assert!(matches!(
            err,
            LaserEyesError::InsufficientFunds {
                required: 41_000,
                available: 5_000
            }
        ));
    }

    #[test]
    fn recipient_on_another_network_is_invalid() {
        let account = test_account(NetworkType::Mainnet);
        let testnet = test_account(NetworkType::Testnet).address;
        let utxos = vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 50_000, 1)];
        let err = build_btc_send_psbt(NetworkType::Mainnet, &account, utxos, &testnet, 1_000, FeePolicy::Fixed(100))
            .unwrap_err();
        assert!(matches!(err, LaserEyesError::InvalidAddress(_)));
    }

    #[test]
    fn rate_fee_grows_with_inputs() {
        let account = test_account(NetworkType::Mainnet);
        let utxos = vec![
            funding_utxo(NetworkType::Mainnet, &account.payment_address, 30_000, 1),
            funding_utxo(NetworkType::Mainnet, &account.payment_address, 30_000, 2),
        ];
        let built =
            build_btc_send_psbt(NetworkType::Mainnet, &account, utxos, &recipient(), 40_000, FeePolicy::Rate(2.0))
                .unwrap();
        assert_eq!(built.inputs.len(), 2);
        // 10 + 2 * 41 + 2 * 34 = 160 vB
        assert_eq!(built.change, Some(60_000 - 40_000 - 320));
    }
}
