//! Shared data model: UTXOs, fee estimates, chain lookups and asset balances.

use crate::{LaserEyesError, Result};
use bitcoin::{OutPoint, Txid};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    /// Hex encoded; empty when the provider does not report it.
    #[serde(default)]
    pub script_pub_key: String,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub has_inscription: Option<bool>,
    #[serde(default)]
    pub has_alkanes: Option<bool>,
    #[serde(default)]
    pub has_rune: Option<bool>,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32, value: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            value,
            script_pub_key: String::new(),
            confirmations: 0,
            has_inscription: None,
            has_alkanes: None,
            has_rune: None,
        }
    }

    pub fn outpoint(&self) -> Result<OutPoint> {
        Ok(OutPoint {
            txid: Txid::from_str(&self.txid)?,
            vout: self.vout,
        })
    }

    /// True when the output is known to carry an inscription, rune or alkane.
    pub fn carries_asset(&self) -> bool {
        self.has_inscription.unwrap_or(false) || self.has_rune.unwrap_or(false) || self.has_alkanes.unwrap_or(false)
    }
}

/// Recommended fee rates in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub fast_fee: f64,
    pub min_fee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutputInfo {
    pub value: u64,
    pub script_pub_key: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub txid: String,
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub outputs: Vec<TxOutputInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inscription {
    pub id: String,
    pub number: Option<i64>,
    /// `txid:vout` of the output currently holding the inscription.
    pub output: String,
    pub content_type: Option<String>,
    pub value: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Btc,
    #[serde(rename = "brc-20")]
    Brc20,
    Runes,
    Alkanes,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Btc => "btc",
            Protocol::Brc20 => "brc-20",
            Protocol::Runes => "runes",
            Protocol::Alkanes => "alkanes",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignMessageProtocol {
    #[serde(rename = "ecdsa")]
    Ecdsa,
    #[serde(rename = "bip322-simple")]
    Bip322,
}

impl fmt::Display for SignMessageProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignMessageProtocol::Ecdsa => "ecdsa",
            SignMessageProtocol::Bip322 => "bip322-simple",
        })
    }
}

/// Balance of one token under a meta-protocol. Amounts are kept as decimal
/// strings since rune and alkane balances exceed `u64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaBalance {
    pub protocol: Protocol,
    pub id: String,
    pub name: String,
    pub balance: String,
    pub symbol: Option<String>,
    pub divisibility: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuneInfo {
    pub id: String,
    pub name: String,
    pub divisibility: u8,
    pub symbol: Option<String>,
}

/// An output holding some amount of a specific rune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuneOutpoint {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub script_pub_key: String,
    pub balance: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlkaneId {
    pub block: u128,
    pub tx: u128,
}

impl fmt::Display for AlkaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.tx)
    }
}

impl FromStr for AlkaneId {
    type Err = LaserEyesError;

    fn from_str(s: &str) -> Result<Self> {
        let (block, tx) = s
            .split_once(':')
            .ok_or_else(|| LaserEyesError::AssetNotFound(format!("malformed alkane id {s}")))?;
        let parse = |v: &str| {
            parse_u128(v).ok_or_else(|| LaserEyesError::AssetNotFound(format!("malformed alkane id {s}")))
        };
        Ok(AlkaneId {
            block: parse(block)?,
            tx: parse(tx)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlkaneBalance {
    pub id: AlkaneId,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub amount: u128,
}

/// An output holding one or more alkanes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlkaneOutpoint {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub script_pub_key: String,
    pub alkanes: Vec<AlkaneBalance>,
}

impl AlkaneOutpoint {
    pub fn balance_of(&self, id: &AlkaneId) -> u128 {
        self.alkanes
            .iter()
            .filter(|a| &a.id == id)
            .map(|a| a.amount)
            .sum()
    }
}

/// Parses decimal or `0x`-prefixed hexadecimal integers as returned by
/// indexer RPCs.
pub fn parse_u128(value: &str) -> Option<u128> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) if hex.is_empty() => Some(0),
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alkane_id_accepts_hex_and_decimal() {
        assert_eq!("2:1".parse::<AlkaneId>().unwrap(), AlkaneId { block: 2, tx: 1 });
        assert_eq!("0x2:0x10".parse::<AlkaneId>().unwrap(), AlkaneId { block: 2, tx: 16 });
        assert!("2".parse::<AlkaneId>().is_err());
        assert_eq!(AlkaneId { block: 2, tx: 1 }.to_string(), "2:1");
    }

    #[test]
    fn asset_flags_mark_utxo_as_protected() {
        let mut utxo = Utxo::new("00".repeat(32), 0, 10_000);
        assert!(!utxo.carries_asset());
        utxo.has_rune = Some(true);
        assert!(utxo.carries_asset());
    }

    #[test]
    fn protocol_names_serialize_like_wallet_apis() {
        assert_eq!(serde_json::to_string(&Protocol::Brc20).unwrap(), "\"brc-20\"");
        assert_eq!(serde_json::to_string(&SignMessageProtocol::Bip322).unwrap(), "\"bip322-simple\"");
    }
}
