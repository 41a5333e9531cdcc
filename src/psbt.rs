//! PSBT encoding helpers and the normalized signing result.
//!
//! Wallets disagree on whether PSBTs travel as hex or base64, so every PSBT
//! that leaves a builder is carried as an [`EncodedPsbt`] holding both.

use crate::{LaserEyesError, Result};
use base64::Engine;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::Psbt;
use bitcoin::script::{Builder, PushBytes};
use bitcoin::{Transaction, Witness};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedPsbt {
    pub hex: String,
    pub base64: String,
}

impl EncodedPsbt {
    pub fn from_psbt(psbt: &Psbt) -> Self {
        let bytes = psbt.serialize();
        Self {
            hex: hex::encode(&bytes),
            base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        }
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let psbt = Psbt::deserialize(&hex::decode(hex_str.trim())?)?;
        Ok(Self::from_psbt(&psbt))
    }

    pub fn from_base64(b64: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64.trim())?;
        let psbt = Psbt::deserialize(&bytes)?;
        Ok(Self::from_psbt(&psbt))
    }

    /// Accepts either encoding. Hex is tried first since a valid PSBT hex
    /// string (`70736274ff...`) is never valid base64 of a PSBT.
    pub fn parse(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        if trimmed.len() % 2 == 0 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Ok(parsed) = Self::from_hex(trimmed) {
                return Ok(parsed);
            }
        }
        Self::from_base64(trimmed)
            .map_err(|e| LaserEyesError::Psbt(format!("not a hex or base64 PSBT: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_psbt(&Psbt::deserialize(bytes)?))
    }

    pub fn to_psbt(&self) -> Result<Psbt> {
        Ok(Psbt::deserialize(&hex::decode(&self.hex)?)?)
    }
}

/// Extracts the network transaction from a finalized PSBT without the
/// fee-rate sanity check.
pub fn extract_transaction(psbt: &EncodedPsbt) -> Result<Transaction> {
    let psbt = psbt.to_psbt()?;
    let unfinalized = psbt
        .inputs
        .iter()
        .position(|input| input.final_script_witness.is_none() && input.final_script_sig.is_none());
    if let Some(index) = unfinalized {
        log::warn!("[Psbt] input {index} is not finalized, extracting anyway");
    }
    Ok(psbt.extract_tx_unchecked_fee_rate())
}

pub fn extract_transaction_hex(psbt: &EncodedPsbt) -> Result<String> {
    Ok(serialize_hex(&extract_transaction(psbt)?))
}

/// Finalizes inputs a wallet signed but left unfinalized.
///
/// Handles taproot key-path signatures and single-key P2WPKH, wrapped in
/// P2SH when a redeem script is present. Returns the number of inputs
/// finalized; inputs it cannot handle are left untouched.
pub fn finalize_signed_inputs(psbt: &mut Psbt) -> Result<usize> {
    let mut finalized = 0;
    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        if input.final_script_witness.is_some() || input.final_script_sig.is_some() {
            continue;
        }
        if let Some(signature) = &input.tap_key_sig {
            input.final_script_witness = Some(Witness::p2tr_key_spend(signature));
        } else if input.partial_sigs.len() == 1 {
            let Some((pubkey, signature)) = input.partial_sigs.iter().next() else {
                continue;
            };
            input.final_script_witness = Some(Witness::from_slice(&[signature.to_vec(), pubkey.to_bytes()]));
            if let Some(redeem_script) = &input.redeem_script {
                let push = <&PushBytes>::try_from(redeem_script.as_bytes())?;
                input.final_script_sig = Some(Builder::new().push_slice(push).into_script());
            }
        } else {
            log::debug!("[Psbt] input {index} has no signature this finalizer understands");
            continue;
        }
        input.partial_sigs.clear();
        input.tap_key_sig = None;
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
        input.tap_key_origins.clear();
        finalized += 1;
    }
    Ok(finalized)
}

/// Outcome of handing a PSBT to a wallet: either it came back signed, or the
/// wallet finalized and broadcast it itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignResult {
    Signed { psbt: EncodedPsbt },
    Broadcast { txid: String, psbt: Option<EncodedPsbt> },
}

impl SignResult {
    pub fn txid(&self) -> Option<&str> {
        match self {
            SignResult::Signed { .. } => None,
            SignResult::Broadcast { txid, .. } => Some(txid),
        }
    }

    pub fn psbt(&self) -> Option<&EncodedPsbt> {
        match self {
            SignResult::Signed { psbt } => Some(psbt),
            SignResult::Broadcast { psbt, .. } => psbt.as_ref(),
        }
    }
}

/// Restricts signing to a specific input with a specific key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputToSign {
    pub index: usize,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignPsbtRequest {
    pub psbt: EncodedPsbt,
    pub finalize: bool,
    pub broadcast: bool,
    pub inputs_to_sign: Vec<InputToSign>,
}

impl SignPsbtRequest {
    pub fn new(psbt: EncodedPsbt) -> Self {
        Self {
            psbt,
            finalize: true,
            broadcast: false,
            inputs_to_sign: Vec::new(),
        }
    }

    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn finalize(mut self, finalize: bool) -> Self {
        self.finalize = finalize;
        self
    }

    pub fn inputs_to_sign(mut self, inputs: Vec<InputToSign>) -> Self {
        self.inputs_to_sign = inputs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut};

    fn sample_psbt() -> Psbt {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::new_op_return([1u8, 2, 3]),
            }],
        };
        Psbt::from_unsigned_tx(tx).unwrap()
    }

    #[test]
    fn hex_and_base64_describe_the_same_bytes() {
        let encoded = EncodedPsbt::from_psbt(&sample_psbt());
        assert!(encoded.hex.starts_with("70736274ff"));
        assert_eq!(EncodedPsbt::from_hex(&encoded.hex).unwrap(), encoded);
        assert_eq!(EncodedPsbt::from_base64(&encoded.base64).unwrap(), encoded);
        assert_eq!(EncodedPsbt::parse(&encoded.base64).unwrap().hex, encoded.hex);
        assert_eq!(EncodedPsbt::parse(&encoded.hex).unwrap().base64, encoded.base64);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(EncodedPsbt::parse("deadbeef").is_err());
        assert!(EncodedPsbt::parse("!!not base64!!").is_err());
    }

    #[test]
    fn sign_result_exposes_txid_only_when_broadcast() {
        let psbt = EncodedPsbt::from_psbt(&sample_psbt());
        let signed = SignResult::Signed { psbt: psbt.clone() };
        assert_eq!(signed.txid(), None);
        let sent = SignResult::Broadcast { txid: "ff".repeat(32), psbt: None };
        assert_eq!(sent.txid(), Some("ff".repeat(32).as_str()));
        assert!(sent.psbt().is_none());
    }

    #[test]
    fn key_path_signature_is_moved_into_the_witness() {
        use bitcoin::secp256k1::{Message, Secp256k1};
        use bitcoin::{key::Keypair, taproot};

        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[7u8; 32]).unwrap();
        let msg = Message::from_digest([3u8; 32]);
        let signature = taproot::Signature {
            signature: secp.sign_schnorr_no_aux_rand(&msg, &keypair),
            sighash_type: bitcoin::TapSighashType::Default,
        };

        let mut psbt = sample_psbt();
        psbt.inputs[0].tap_key_sig = Some(signature);
        assert_eq!(finalize_signed_inputs(&mut psbt).unwrap(), 1);
        let witness = psbt.inputs[0].final_script_witness.as_ref().unwrap();
        assert_eq!(witness.len(), 1);
        assert!(psbt.inputs[0].tap_key_sig.is_none());
        assert_eq!(finalize_signed_inputs(&mut psbt).unwrap(), 0);
    }
}
