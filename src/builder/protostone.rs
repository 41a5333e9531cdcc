//! Protostone encoding for alkanes transfers.
//!
//! Protostones ride inside a runestone's protocol field (tag 16383). Each
//! protostone is flattened to integers, LEB128-encoded, packed into 15-byte
//! little-endian words, and prefixed with its protocol tag and word count.
//! The list of all protostones is packed the same way once more.

use crate::types::AlkaneId;
use crate::Result;
use bitcoin::opcodes::all::{OP_PUSHNUM_13, OP_RETURN};
use bitcoin::script::{Builder, PushBytes};
use bitcoin::ScriptBuf;
use ordinals::varint;

/// Runestone field that carries protocol messages.
pub const PROTOCOL_FIELD: u128 = 16383;
pub const ALKANES_PROTOCOL_TAG: u128 = 1;

mod tag {
    pub const BODY: u128 = 0;
    pub const MESSAGE: u128 = 81;
    pub const BURN: u128 = 83;
    pub const FROM: u128 = 85;
    pub const POINTER: u128 = 91;
    pub const REFUND: u128 = 93;
}

const MAX_SCRIPT_PUSH: usize = 520;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoEdict {
    pub id: AlkaneId,
    pub amount: u128,
    pub output: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protostone {
    pub protocol_tag: u128,
    pub burn: Option<u128>,
    pub pointer: Option<u32>,
    pub refund: Option<u32>,
    pub from: Option<u32>,
    /// Calldata for the protocol, packed into 15-byte words.
    pub message: Vec<u8>,
    pub edicts: Vec<ProtoEdict>,
}

impl Protostone {
    /// Plain alkanes transfer: move `amount` of `id` to `output`, sending
    /// any remainder to `pointer` and refunds to `refund`.
    pub fn transfer(id: AlkaneId, amount: u128, output: u32, pointer: u32, refund: u32) -> Self {
        Self {
            protocol_tag: ALKANES_PROTOCOL_TAG,
            pointer: Some(pointer),
            refund: Some(refund),
            edicts: vec![ProtoEdict { id, amount, output }],
            ..Default::default()
        }
    }

    /// The tag/value stream of this protostone, before packing.
    pub fn fields(&self) -> Vec<u128> {
        let mut fields = Vec::new();
        let mut push = |t: u128, value: Option<u128>| {
            if let Some(value) = value {
                fields.push(t);
                fields.push(value);
            }
        };
        push(tag::BURN, self.burn);
        push(tag::POINTER, self.pointer.map(u128::from));
        push(tag::REFUND, self.refund.map(u128::from));
        push(tag::FROM, self.from.map(u128::from));
        for word in pack_words(&self.message) {
            fields.push(tag::MESSAGE);
            fields.push(word);
        }
        if !self.edicts.is_empty() {
            fields.push(tag::BODY);
            let mut edicts = self.edicts.clone();
            edicts.sort_by_key(|e| e.id);
            let mut previous = AlkaneId { block: 0, tx: 0 };
            for edict in edicts {
                let block_delta = edict.id.block - previous.block;
                let tx = if block_delta == 0 {
                    edict.id.tx - previous.tx
                } else {
                    edict.id.tx
                };
                fields.extend([block_delta, tx, edict.amount, u128::from(edict.output)]);
                previous = edict.id;
            }
        }
        fields
    }

    /// Packed words as they appear after the protocol tag and length.
    pub fn to_integers(&self) -> Vec<u128> {
        pack_words(&encode_varints(&self.fields()))
    }
}

/// LEB128 encoding of every value, concatenated.
pub fn encode_varints(values: &[u128]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for value in values {
        varint::encode_to_vec(*value, &mut bytes);
    }
    bytes
}

/// Splits bytes into 15-byte little-endian words so every word stays a
/// valid rune integer.
pub fn pack_words(bytes: &[u8]) -> Vec<u128> {
    bytes
        .chunks(15)
        .map(|chunk| {
            let mut word = [0u8; 16];
            word[..chunk.len()].copy_from_slice(chunk);
            u128::from_le_bytes(word)
        })
        .collect()
}

/// Values for the runestone protocol field.
pub fn encipher(protostones: &[Protostone]) -> Vec<u128> {
    let mut values = Vec::new();
    for stone in protostones {
        let words = stone.to_integers();
        values.push(stone.protocol_tag);
        values.push(words.len() as u128);
        values.extend(words);
    }
    pack_words(&encode_varints(&values))
}

/// `OP_RETURN OP_13 <payload>` carrying the protostones.
pub fn protostone_script(protostones: &[Protostone]) -> Result<ScriptBuf> {
    let mut payload = Vec::new();
    for value in encipher(protostones) {
        varint::encode_to_vec(PROTOCOL_FIELD, &mut payload);
        varint::encode_to_vec(value, &mut payload);
    }
    let mut builder = Builder::new().push_opcode(OP_RETURN).push_opcode(OP_PUSHNUM_13);
    for chunk in payload.chunks(MAX_SCRIPT_PUSH) {
        builder = builder.push_slice(<&PushBytes>::try_from(chunk)?);
    }
    Ok(builder.into_script())
}
