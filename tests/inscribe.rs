use anyhow::Result;
use bitcoin::secp256k1::{Keypair, Secp256k1};
use lasereyes::inscribe::commit::{build_commit_psbt, commit_address, commit_spend_info};
use lasereyes::inscribe::{
    build_inscription_script, calculate_commit_cost, InscribeOptions, InscriptionContent, InscriptionEngine,
    InscriptionState,
};
use lasereyes::mock::{funding_utxo, test_account, MockDataSource, MockSigner};
use lasereyes::{DataSourceManager, LaserEyesError, NetworkType};
use std::sync::Arc;

const NETWORK: NetworkType = NetworkType::Mainnet;

fn text(len: usize) -> InscriptionContent {
    InscriptionContent::new("A".repeat(len), "text/plain")
}

#[test]
fn hundred_bytes_at_ten_sats_costs_3579() -> Result<()> {
    let cost = calculate_commit_cost(&[text(100)], 10.0)?;
    assert_eq!(cost.commit_sats, 1_700);
    assert_eq!(cost.reveal_sats, 1_879);
    assert_eq!(cost.total, 3_579);
    Ok(())
}

#[test]
fn cost_grows_with_content_and_fee_rate() -> Result<()> {
    let mut last = 0;
    for len in [10, 100, 1_000, 10_000, 100_000] {
        let total = calculate_commit_cost(&[text(len)], 5.0)?.total;
        assert!(total >= last, "{len}");
        last = total;
    }
    let mut last = 0;
    for rate in [1.0, 2.5, 10.0, 50.0] {
        let total = calculate_commit_cost(&[text(500)], rate)?.total;
        assert!(total > last, "{rate}");
        last = total;
    }
    Ok(())
}

#[test]
fn small_funding_utxos_are_insufficient() -> Result<()> {
    let account = test_account(NETWORK);
    let secp = Secp256k1::new();
    let key = Keypair::from_seckey_slice(&secp, &[3u8; 32])?.x_only_public_key().0;
    let script = build_inscription_script(&key, &[text(100)])?;
    let spend_info = commit_spend_info(&secp, key, &script)?;
    let address = commit_address(NETWORK, &spend_info);
    let cost = calculate_commit_cost(&[text(100)], 10.0)?;

    let utxos = vec![funding_utxo(NETWORK, &account.payment_address, 2_000, 1)];
    let err = build_commit_psbt(NETWORK, &account, &address, &cost, utxos).unwrap_err();
    assert!(matches!(
        err,
        LaserEyesError::InsufficientFunds {
            required: 3_579,
            available: 0
        }
    ));
    Ok(())
}

#[tokio::test]
async fn batch_inscription_reveals_every_content() -> Result<()> {
    let account = test_account(NETWORK);
    let source = MockDataSource::new("mock")
        .with_auto_confirm()
        .with_fees(4.0, 1.0)
        .with_utxos(&account.payment_address, vec![funding_utxo(NETWORK, &account.payment_address, 40_000, 1)]);
    let manager = DataSourceManager::new().with_source(Arc::new(source.clone()), 1);
    let signer = MockSigner::new();
    let engine = InscriptionEngine::new(&manager, &signer, NETWORK);

    let contents = vec![text(40), InscriptionContent::new("e30=", "application/json")];
    let outcome = engine
        .inscribe(
            &account,
            contents,
            InscribeOptions {
                fee_rate: None,
                op_return: Some("0x6c6173".into()),
            },
        )
        .await?;

    assert_eq!(outcome.transitions.last(), Some(&InscriptionState::Done));
    assert_eq!(
        outcome.inscription_ids,
        vec![format!("{}i0", outcome.reveal_txid), format!("{}i1", outcome.reveal_txid)]
    );
    let reveal = &source.broadcast_transactions()[1];
    assert_eq!(reveal.output.len(), 3);
    assert!(reveal.output[2].script_pubkey.is_op_return());
    assert_eq!(signer.calls(), 1);
    Ok(())
}
