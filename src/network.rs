//! Network selection, address validation and per-network provider endpoints.

use crate::{LaserEyesError, Result};
use bitcoin::{Address, Network};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkType {
    #[default]
    Mainnet,
    Testnet,
    Testnet4,
    Signet,
    FractalMainnet,
    FractalTestnet,
    Regtest,
}

impl NetworkType {
    pub const ALL: [NetworkType; 7] = [
        NetworkType::Mainnet,
        NetworkType::Testnet,
        NetworkType::Testnet4,
        NetworkType::Signet,
        NetworkType::FractalMainnet,
        NetworkType::FractalTestnet,
        NetworkType::Regtest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Testnet4 => "testnet4",
            NetworkType::Signet => "signet",
            NetworkType::FractalMainnet => "fractal-mainnet",
            NetworkType::FractalTestnet => "fractal-testnet",
            NetworkType::Regtest => "regtest",
        }
    }

    /// Address parameters used on this network. Fractal shares mainnet
    /// address encoding and testnet4 shares testnet encoding.
    pub fn bitcoin_network(&self) -> Network {
        match self {
            NetworkType::Mainnet | NetworkType::FractalMainnet | NetworkType::FractalTestnet => {
                Network::Bitcoin
            }
            NetworkType::Testnet | NetworkType::Testnet4 => Network::Testnet,
            NetworkType::Signet => Network::Signet,
            NetworkType::Regtest => Network::Regtest,
        }
    }

    pub fn is_mainnet_encoding(&self) -> bool {
        self.bitcoin_network() == Network::Bitcoin
    }

    /// Cheap prefix check used before restoring a persisted session.
    pub fn accepts_address(&self, address: &str) -> bool {
        let lower = address.to_ascii_lowercase();
        match self.bitcoin_network() {
            Network::Bitcoin => {
                lower.starts_with("bc1") || address.starts_with('1') || address.starts_with('3')
            }
            Network::Regtest => {
                lower.starts_with("bcrt1")
                    || address.starts_with('m')
                    || address.starts_with('n')
                    || address.starts_with('2')
            }
            _ => {
                (lower.starts_with("tb1") && !lower.starts_with("bcrt1"))
                    || address.starts_with('m')
                    || address.starts_with('n')
                    || address.starts_with('2')
            }
        }
    }

    /// Parses `address` and checks it belongs to this network.
    pub fn parse_address(&self, address: &str) -> Result<Address> {
        let unchecked = Address::from_str(address)
            .map_err(|e| LaserEyesError::InvalidAddress(format!("{address}: {e}")))?;
        unchecked
            .require_network(self.bitcoin_network())
            .map_err(|_| LaserEyesError::InvalidAddress(format!("{address} is not a {self} address")))
    }

    pub fn mempool_url(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "https://mempool.space",
            NetworkType::Testnet => "https://mempool.space/testnet",
            NetworkType::Testnet4 => "https://mempool.space/testnet4",
            NetworkType::Signet => "https://mempool.space/signet",
            NetworkType::FractalMainnet => "https://mempool.fractalbitcoin.io",
            NetworkType::FractalTestnet => "https://mempool-testnet.fractalbitcoin.io",
            NetworkType::Regtest => "http://localhost:3000",
        }
    }

    pub fn sandshrew_url(&self) -> &'static str {
        match self {
            NetworkType::Mainnet | NetworkType::FractalMainnet => "https://mainnet.sandshrew.io/v2",
            NetworkType::Testnet | NetworkType::Testnet4 | NetworkType::FractalTestnet => {
                "https://testnet.sandshrew.io/v2"
            }
            NetworkType::Signet => "https://signet.sandshrew.io/v2",
            NetworkType::Regtest => "http://localhost:18888/v2",
        }
    }

    pub fn maestro_url(&self) -> Option<&'static str> {
        match self {
            NetworkType::Mainnet => Some("https://xbt-mainnet.gomaestro-api.org/v0"),
            NetworkType::Testnet4 => Some("https://xbt-testnet.gomaestro-api.org/v0"),
            _ => None,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = LaserEyesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "livenet" | "bitcoin" => Ok(NetworkType::Mainnet),
            "testnet" | "testnet3" => Ok(NetworkType::Testnet),
            "testnet4" => Ok(NetworkType::Testnet4),
            "signet" => Ok(NetworkType::Signet),
            "fractal-mainnet" | "fractal" => Ok(NetworkType::FractalMainnet),
            "fractal-testnet" => Ok(NetworkType::FractalTestnet),
            "regtest" => Ok(NetworkType::Regtest),
            other => Err(LaserEyesError::Config(format!("unknown network: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAINNET_TR: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";
    const TESTNET_WPKH: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    #[test]
    fn prefix_check_separates_networks() {
        assert!(NetworkType::Mainnet.accepts_address(MAINNET_TR));
        assert!(!NetworkType::Mainnet.accepts_address(TESTNET_WPKH));
        assert!(NetworkType::Testnet.accepts_address(TESTNET_WPKH));
        assert!(NetworkType::Signet.accepts_address(TESTNET_WPKH));
        assert!(!NetworkType::Testnet4.accepts_address(MAINNET_TR));
        assert!(NetworkType::FractalMainnet.accepts_address(MAINNET_TR));
    }

    #[test]
    fn parse_address_rejects_wrong_network() {
        assert!(NetworkType::Mainnet.parse_address(MAINNET_TR).is_ok());
        let err = NetworkType::Testnet.parse_address(MAINNET_TR).unwrap_err();
        assert!(matches!(err, LaserEyesError::InvalidAddress(_)));
        assert!(NetworkType::Mainnet.parse_address("not-an-address").is_err());
    }

    #[test]
    fn parses_wallet_network_names() {
        assert_eq!("livenet".parse::<NetworkType>().unwrap(), NetworkType::Mainnet);
        assert_eq!("fractal-testnet".parse::<NetworkType>().unwrap(), NetworkType::FractalTestnet);
        assert!("moonnet".parse::<NetworkType>().is_err());
    }
}
