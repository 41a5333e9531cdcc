//! The reveal transaction: a tapscript spend of commit output 0 signed
//! with the ephemeral key.

use super::envelope::INSCRIPTION_POSTAGE;
use crate::builder::output_to;
use crate::{LaserEyesError, Result};
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::key::Keypair;
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::{Builder, PushBytes};
use bitcoin::secp256k1::{Message, Secp256k1, Signing, Verification};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash, TaprootSpendInfo};
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

/// `OP_RETURN <data>` from a hex payload, with or without a `0x` prefix.
pub fn op_return_script(payload_hex: &str) -> Result<ScriptBuf> {
    let payload = payload_hex.trim();
    let data = hex::decode(payload.strip_prefix("0x").unwrap_or(payload))?;
    Ok(Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(<&PushBytes>::try_from(data.as_slice())?)
        .into_script())
}

/// Everything the reveal spends and where it sends the inscriptions.
pub struct RevealParams<'a> {
    pub commit_outpoint: OutPoint,
    /// Value of commit output 0 as observed on chain.
    pub commit_value: u64,
    pub script: &'a ScriptBuf,
    pub spend_info: &'a TaprootSpendInfo,
    pub ordinal_address: &'a Address,
    pub inscription_count: usize,
    pub op_return: Option<&'a str>,
}

/// Builds and signs the reveal. Outputs are one postage output per
/// inscription, in inscription order, then the optional `OP_RETURN`.
pub fn build_reveal_transaction<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    keypair: &Keypair,
    params: &RevealParams<'_>,
) -> Result<Transaction> {
    let postage = INSCRIPTION_POSTAGE * params.inscription_count as u64;
    if params.commit_value < postage {
        return Err(LaserEyesError::InsufficientFunds {
            required: postage,
            available: params.commit_value,
        });
    }

    let mut output: Vec<TxOut> = (0..params.inscription_count)
        .map(|_| output_to(params.ordinal_address, INSCRIPTION_POSTAGE))
        .collect();
    if let Some(payload) = params.op_return {
        output.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: op_return_script(payload)?,
        });
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: params.commit_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output,
    };

    let prevout = TxOut {
        value: Amount::from_sat(params.commit_value),
        script_pubkey: ScriptBuf::new_p2tr_tweaked(params.spend_info.output_key()),
    };
    let leaf_hash = TapLeafHash::from_script(params.script, LeafVersion::TapScript);
    let sighash = SighashCache::new(&tx).taproot_script_spend_signature_hash(
        0,
        &Prevouts::All(&[prevout]),
        leaf_hash,
        TapSighashType::Default,
    )?;
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = bitcoin::taproot::Signature {
        signature: secp.sign_schnorr_no_aux_rand(&message, keypair),
        sighash_type: TapSighashType::Default,
    };

    let control_block = params
        .spend_info
        .control_block(&(params.script.clone(), LeafVersion::TapScript))
        .ok_or_else(|| LaserEyesError::Transaction("inscription script is not in the commit tree".to_string()))?;

    let mut witness = Witness::new();
    witness.push(signature.to_vec());
    witness.push(params.script.as_bytes());
    witness.push(control_block.serialize());
    tx.input[0].witness = witness;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inscribe::commit::commit_spend_info;
    use crate::inscribe::envelope::{build_inscription_script, InscriptionContent};
    use crate::mock::{test_account, test_txid};
    use crate::network::NetworkType;
    use bitcoin::secp256k1::schnorr;
    use bitcoin::XOnlyPublicKey;
    use core::str::FromStr;

    struct Fixture {
        secp: Secp256k1<bitcoin::secp256k1::All>,
        keypair: Keypair,
        script: ScriptBuf,
        spend_info: TaprootSpendInfo,
        ordinals: Address,
    }

    fn fixture(count: usize) -> Fixture {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[9u8; 32]).unwrap();
        let key = keypair.x_only_public_key().0;
        let contents = vec![InscriptionContent::new("aGVsbG8=", "text/plain"); count];
        let script = build_inscription_script(&key, &contents).unwrap();
        let spend_info = commit_spend_info(&secp, key, &script).unwrap();
        let ordinals = NetworkType::Mainnet
            .parse_address(&test_account(NetworkType::Mainnet).address)
            .unwrap();
        Fixture {
            secp,
            keypair,
            script,
            spend_info,
            ordinals,
        }
    }

    fn params<'a>(f: &'a Fixture, count: usize, value: u64, op_return: Option<&'a str>) -> RevealParams<'a> {
        RevealParams {
            commit_outpoint: OutPoint {
                txid: bitcoin::Txid::from_str(&test_txid(4)).unwrap(),
                vout: 0,
            },
            commit_value: value,
            script: &f.script,
            spend_info: &f.spend_info,
            ordinal_address: &f.ordinals,
            inscription_count: count,
            op_return,
        }
    }

    #[test]
    fn reveal_carries_one_postage_output_per_inscription() {
        let f = fixture(3);
        let tx = build_reveal_transaction(&f.secp, &f.keypair, &params(&f, 3, 5_000, Some("0xdeadbeef"))).unwrap();
        assert_eq!(tx.output.len(), 4);
        for out in &tx.output[..3] {
            assert_eq!(out.value.to_sat(), 546);
            assert_eq!(out.script_pubkey, f.ordinals.script_pubkey());
        }
        assert!(tx.output[3].script_pubkey.is_op_return());
        assert_eq!(tx.output[3].script_pubkey, op_return_script("deadbeef").unwrap());
    }

    #[test]
    fn witness_is_a_valid_script_path_spend() {
        let f = fixture(1);
        let p = params(&f, 1, 2_000, None);
        let tx = build_reveal_transaction(&f.secp, &f.keypair, &p).unwrap();
        let witness: Vec<&[u8]> = tx.input[0].witness.iter().collect();
        assert_eq!(witness.len(), 3);
        assert_eq!(witness[1], f.script.as_bytes());

        let control_block = bitcoin::taproot::ControlBlock::decode(witness[2]).unwrap();
        assert!(control_block.verify_taproot_commitment(&f.secp, f.spend_info.output_key().to_inner(), &f.script));

        let prevout = TxOut {
            value: Amount::from_sat(2_000),
            script_pubkey: ScriptBuf::new_p2tr_tweaked(f.spend_info.output_key()),
        };
        let sighash = SighashCache::new(&tx)
            .taproot_script_spend_signature_hash(
                0,
                &Prevouts::All(&[prevout]),
                TapLeafHash::from_script(&f.script, LeafVersion::TapScript),
                TapSighashType::Default,
            )
            .unwrap();
        let signature = schnorr::Signature::from_slice(witness[0]).unwrap();
        let key: XOnlyPublicKey = f.keypair.x_only_public_key().0;
        f.secp
            .verify_schnorr(&signature, &Message::from_digest(sighash.to_byte_array()), &key)
            .unwrap();
    }

    #[test]
    fn commit_value_must_cover_postage() {
        let f = fixture(2);
        let err = build_reveal_transaction(&f.secp, &f.keypair, &params(&f, 2, 1_000, None)).unwrap_err();
        assert!(matches!(err, LaserEyesError::InsufficientFunds { required: 1_092, .. }));
    }
}
