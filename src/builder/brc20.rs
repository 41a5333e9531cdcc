//! BRC-20 transfers.
//!
//! A BRC-20 send is two steps: inscribe a `transfer` operation to the
//! sender's own ordinals address, then move that inscription to the
//! recipient. The client drives both steps; this module supplies the
//! inscription body.

use crate::{LaserEyesError, Result};
use serde::{Deserialize, Serialize};

pub const BRC20_MIME_TYPE: &str = "text/plain;charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brc20Transfer {
    pub p: String,
    pub op: String,
    pub tick: String,
    pub amt: String,
}

impl Brc20Transfer {
    pub fn new(tick: &str, amount: &str) -> Result<Self> {
        let tick = tick.trim();
        if tick.is_empty() || tick.chars().count() > 5 {
            return Err(LaserEyesError::AssetNotFound(format!("invalid brc-20 ticker {tick:?}")));
        }
        let amount = amount.trim();
        let valid_amount = !amount.is_empty()
            && amount.chars().all(|c| c.is_ascii_digit() || c == '.')
            && amount.matches('.').count() <= 1
            && amount.chars().any(|c| c.is_ascii_digit() && c != '0');
        if !valid_amount {
            return Err(LaserEyesError::MalformedAmount(amount.to_string()));
        }
        Ok(Self {
            p: "brc-20".to_string(),
            op: "transfer".to_string(),
            tick: tick.to_string(),
            amt: amount.to_string(),
        })
    }
}

/// JSON body of a transfer inscription.
pub fn brc20_transfer_content(tick: &str, amount: &str) -> Result<String> {
    Ok(serde_json::to_string(&Brc20Transfer::new(tick, amount)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_body_matches_indexer_format() {
        assert_eq!(
            brc20_transfer_content("ordi", "100").unwrap(),
            r#"{"p":"brc-20","op":"transfer","tick":"ordi","amt":"100"}"#
        );
    }

    #[test]
    fn malformed_transfers_are_rejected() {
        assert!(brc20_transfer_content("", "1").is_err());
        assert!(brc20_transfer_content("toolong", "1").is_err());
        assert!(brc20_transfer_content("ordi", "0").is_err());
        assert!(brc20_transfer_content("ordi", "1.2.3").is_err());
        assert!(brc20_transfer_content("ordi", "-5").is_err());
        assert!(brc20_transfer_content("ordi", "0.5").is_ok());
    }
}
