//! Ord inscription envelopes.
//!
//! The reveal script is `<key> OP_CHECKSIG` followed by one envelope per
//! inscription:
//! `OP_FALSE OP_IF "ord" 0x01 <mime> [0x02 <pointer>] OP_0 <body chunks> OP_ENDIF`.
//! Every envelope after the first carries a pointer so each inscription
//! lands on its own 546-sat reveal output.

use crate::{LaserEyesError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bitcoin::blockdata::opcodes;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF};
use bitcoin::script::{Builder, PushBytes};
use bitcoin::{ScriptBuf, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

pub const ORD_PROTOCOL_ID: [u8; 3] = *b"ord";
pub const CONTENT_TYPE_TAG: u8 = 0x01;
pub const POINTER_TAG: u8 = 0x02;
const BODY_TAG: [u8; 0] = [];
const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Postage of each revealed inscription.
pub const INSCRIPTION_POSTAGE: u64 = 546;

/// One inscription as submitted: base64 content and its mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InscriptionContent {
    pub content_base64: String,
    pub mime_type: String,
}

impl InscriptionContent {
    pub fn new(content_base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            content_base64: content_base64.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Raw bytes as they go into the envelope. Text is normalized to UTF-8,
    /// replacing invalid sequences.
    pub fn body(&self) -> Result<Vec<u8>> {
        let decoded = STANDARD.decode(self.content_base64.trim())?;
        if self.mime_type.starts_with("text/plain") {
            return Ok(String::from_utf8_lossy(&decoded).into_owned().into_bytes());
        }
        Ok(decoded)
    }
}

/// Minimal little-endian encoding, as ord reads integer fields.
fn encode_pointer(pointer: u64) -> Vec<u8> {
    let mut bytes = pointer.to_le_bytes().to_vec();
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

/// Sat offset of the `index`th inscription within the reveal outputs.
pub fn inscription_pointer(index: usize) -> u64 {
    INSCRIPTION_POSTAGE * index as u64
}

pub fn build_inscription_script(key: &XOnlyPublicKey, contents: &[InscriptionContent]) -> Result<ScriptBuf> {
    if contents.is_empty() {
        return Err(LaserEyesError::Transaction("nothing to inscribe".to_string()));
    }
    let mut builder = Builder::new().push_x_only_key(key).push_opcode(OP_CHECKSIG);
    for (index, content) in contents.iter().enumerate() {
        builder = builder
            .push_opcode(opcodes::OP_FALSE)
            .push_opcode(OP_IF)
            .push_slice(ORD_PROTOCOL_ID)
            .push_slice([CONTENT_TYPE_TAG])
            .push_slice(<&PushBytes>::try_from(content.mime_type.as_bytes())?);
        if index > 0 {
            let pointer = encode_pointer(inscription_pointer(index));
            builder = builder
                .push_slice([POINTER_TAG])
                .push_slice(<&PushBytes>::try_from(pointer.as_slice())?);
        }
        builder = builder.push_slice(BODY_TAG);
        for chunk in content.body()?.chunks(MAX_SCRIPT_ELEMENT_SIZE) {
            builder = builder.push_slice(<&PushBytes>::try_from(chunk)?);
        }
        builder = builder.push_opcode(OP_ENDIF);
    }
    Ok(builder.into_script())
}
