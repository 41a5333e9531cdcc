//! Error types.

use crate::inscribe::{InscriptionState, PendingReveal};
use crate::types::{Protocol, SignMessageProtocol};
use crate::wallet::ProviderId;
use thiserror::Error;

/// The `Result` type for this crate.
pub type Result<T> = core::result::Result<T, LaserEyesError>;

/// The error type for this crate.
#[derive(Error, Debug)]
pub enum LaserEyesError {
    #[error("{0} wallet is not installed")]
    WalletNotInstalled(ProviderId),
    #[error("request rejected by the user in {0}")]
    UserRejected(ProviderId),
    #[error("{0} does not support switching networks")]
    NetworkSwitchUnsupported(ProviderId),
    #[error("{provider} does not support {protocol} message signing")]
    UnsupportedProtocol {
        provider: ProviderId,
        protocol: SignMessageProtocol,
    },
    #[error("{provider} does not support {operation}")]
    UnsupportedOperation {
        provider: String,
        operation: &'static str,
    },
    #[error("insufficient funds: required {required} sats, available {available} sats")]
    InsufficientFunds { required: u64, available: u64 },
    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientAssetBalance {
        asset: String,
        required: u128,
        available: u128,
    },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("amount {0} is below the dust limit")]
    InvalidAmount(u64),
    #[error("malformed amount {0:?}")]
    MalformedAmount(String),
    #[error("content too large: {size} bytes exceeds {max}")]
    ContentTooLarge { size: usize, max: usize },
    #[error("all data sources failed: {}", .0.join("; "))]
    ProviderError(Vec<String>),
    #[error("no configured data source supports {0}")]
    NoCapableProvider(String),
    #[error("commit transaction {commit_txid} was not observed before the timeout")]
    CommitConfirmationTimeout { commit_txid: String },
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    #[error("no alkane utxos found for {0}")]
    NoAlkaneFound(String),
    #[error("{protocol} sends are not supported by this operation")]
    UnsupportedSend { protocol: Protocol },
    #[error("inscription failed during {phase}: {source}")]
    InscriptionFailed {
        phase: InscriptionState,
        commit_txid: Option<String>,
        pending: Option<Box<PendingReveal>>,
        #[source]
        source: Box<LaserEyesError>,
    },
    #[error("no wallet connected")]
    NotConnected,
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("PSBT error: {0}")]
    Psbt(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Flat discriminant of [`LaserEyesError`] so callers can branch on the
/// failure kind without matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaserEyesErrorKind {
    WalletNotInstalled,
    UserRejected,
    NetworkSwitchUnsupported,
    UnsupportedProtocol,
    UnsupportedOperation,
    InsufficientFunds,
    InvalidAddress,
    InvalidAmount,
    ContentTooLarge,
    ProviderError,
    CommitConfirmationTimeout,
    BroadcastFailed,
    AssetNotFound,
    NotConnected,
    Internal,
}

impl LaserEyesError {
    pub fn kind(&self) -> LaserEyesErrorKind {
        use LaserEyesErrorKind as K;
        match self {
            LaserEyesError::WalletNotInstalled(_) => K::WalletNotInstalled,
            LaserEyesError::UserRejected(_) => K::UserRejected,
            LaserEyesError::NetworkSwitchUnsupported(_) => K::NetworkSwitchUnsupported,
            LaserEyesError::UnsupportedProtocol { .. } => K::UnsupportedProtocol,
            LaserEyesError::UnsupportedOperation { .. } | LaserEyesError::UnsupportedSend { .. } => {
                K::UnsupportedOperation
            }
            LaserEyesError::InsufficientFunds { .. } => K::InsufficientFunds,
            LaserEyesError::InsufficientAssetBalance { .. } => K::InsufficientFunds,
            LaserEyesError::InvalidAddress(_) => K::InvalidAddress,
            LaserEyesError::InvalidAmount(_) | LaserEyesError::MalformedAmount(_) => K::InvalidAmount,
            LaserEyesError::ContentTooLarge { .. } => K::ContentTooLarge,
            LaserEyesError::ProviderError(_) | LaserEyesError::NoCapableProvider(_) => K::ProviderError,
            LaserEyesError::CommitConfirmationTimeout { .. } => K::CommitConfirmationTimeout,
            LaserEyesError::BroadcastFailed(_) => K::BroadcastFailed,
            LaserEyesError::AssetNotFound(_) | LaserEyesError::NoAlkaneFound(_) => K::AssetNotFound,
            LaserEyesError::InscriptionFailed { source, .. } => source.kind(),
            LaserEyesError::NotConnected => K::NotConnected,
            LaserEyesError::Wallet(_)
            | LaserEyesError::Transaction(_)
            | LaserEyesError::Psbt(_)
            | LaserEyesError::Serialization(_)
            | LaserEyesError::Config(_)
            | LaserEyesError::Storage(_)
            | LaserEyesError::Network(_) => K::Internal,
        }
    }

    pub(crate) fn unsupported(provider: impl Into<String>, operation: &'static str) -> Self {
        LaserEyesError::UnsupportedOperation {
            provider: provider.into(),
            operation,
        }
    }

    /// Commit txid of a partially completed inscription, if any.
    pub fn commit_txid(&self) -> Option<&str> {
        match self {
            LaserEyesError::InscriptionFailed { commit_txid, .. } => commit_txid.as_deref(),
            LaserEyesError::CommitConfirmationTimeout { commit_txid } => Some(commit_txid.as_str()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LaserEyesError {
    fn from(err: serde_json::Error) -> Self {
        LaserEyesError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for LaserEyesError {
    fn from(err: hex::FromHexError) -> Self {
        LaserEyesError::Serialization(format!("invalid hex: {err}"))
    }
}

impl From<base64::DecodeError> for LaserEyesError {
    fn from(err: base64::DecodeError) -> Self {
        LaserEyesError::Serialization(format!("invalid base64: {err}"))
    }
}

impl From<reqwest::Error> for LaserEyesError {
    fn from(err: reqwest::Error) -> Self {
        LaserEyesError::Network(err.to_string())
    }
}

impl From<std::io::Error> for LaserEyesError {
    fn from(err: std::io::Error) -> Self {
        LaserEyesError::Storage(format!("{err:?}"))
    }
}

impl From<bitcoin::address::ParseError> for LaserEyesError {
    fn from(err: bitcoin::address::ParseError) -> Self {
        LaserEyesError::InvalidAddress(format!("{err}"))
    }
}

impl From<bitcoin::psbt::Error> for LaserEyesError {
    fn from(err: bitcoin::psbt::Error) -> Self {
        LaserEyesError::Psbt(format!("{err}"))
    }
}

impl From<bitcoin::psbt::ExtractTxError> for LaserEyesError {
    fn from(err: bitcoin::psbt::ExtractTxError) -> Self {
        LaserEyesError::Psbt(format!("PSBT extraction error: {err}"))
    }
}

impl From<bitcoin::consensus::encode::Error> for LaserEyesError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        LaserEyesError::Transaction(format!("{err}"))
    }
}

impl From<bitcoin::sighash::TaprootError> for LaserEyesError {
    fn from(err: bitcoin::sighash::TaprootError) -> Self {
        LaserEyesError::Transaction(format!("{err:?}"))
    }
}

impl From<bitcoin::taproot::TaprootBuilderError> for LaserEyesError {
    fn from(err: bitcoin::taproot::TaprootBuilderError) -> Self {
        LaserEyesError::Transaction(format!("{err:?}"))
    }
}

impl From<bitcoin::secp256k1::Error> for LaserEyesError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        LaserEyesError::Transaction(format!("secp256k1: {err}"))
    }
}

impl From<bitcoin::key::FromSliceError> for LaserEyesError {
    fn from(err: bitcoin::key::FromSliceError) -> Self {
        LaserEyesError::Wallet(format!("invalid public key: {err}"))
    }
}

impl From<bitcoin::script::PushBytesError> for LaserEyesError {
    fn from(err: bitcoin::script::PushBytesError) -> Self {
        LaserEyesError::Transaction(format!("script push too large: {err}"))
    }
}

impl From<std::num::ParseIntError> for LaserEyesError {
    fn from(err: std::num::ParseIntError) -> Self {
        LaserEyesError::Serialization(format!("invalid integer: {err}"))
    }
}

impl From<bitcoin::hex::HexToArrayError> for LaserEyesError {
    fn from(err: bitcoin::hex::HexToArrayError) -> Self {
        LaserEyesError::Serialization(format!("{err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inscription_failure_reports_inner_kind() {
        let err = LaserEyesError::InscriptionFailed {
            phase: InscriptionState::AwaitingCommitConfirmation,
            commit_txid: Some("ab".repeat(32)),
            pending: None,
            source: Box::new(LaserEyesError::CommitConfirmationTimeout {
                commit_txid: "ab".repeat(32),
            }),
        };
        assert_eq!(err.kind(), LaserEyesErrorKind::CommitConfirmationTimeout);
        assert_eq!(err.commit_txid(), Some("ab".repeat(32).as_str()));
    }

    #[test]
    fn provider_error_lists_every_failure() {
        let err = LaserEyesError::ProviderError(vec!["mempool: 500".into(), "sandshrew: timeout".into()]);
        assert_eq!(err.to_string(), "all data sources failed: mempool: 500; sandshrew: timeout");
        assert_eq!(err.kind(), LaserEyesErrorKind::ProviderError);
    }
}
