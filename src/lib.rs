//! LaserEyes core
//!
//! Wallet-integration SDK core for Bitcoin: one capability surface over many
//! browser-extension wallets, failover across chain-data providers, PSBT
//! construction for BTC/BRC-20/Runes/Alkanes sends and the two-phase
//! inscription commit/reveal pipeline.

pub mod builder;
pub mod client;
pub mod config;
pub mod datasource;
pub mod error;
pub mod inscribe;
pub mod network;
pub mod psbt;
pub mod time;
pub mod types;
pub mod wallet;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::LaserEyesClient;
pub use config::Config;
pub use datasource::{Capability, DataSource, DataSourceManager};
pub use error::{LaserEyesError, LaserEyesErrorKind, Result};
pub use network::NetworkType;
pub use psbt::{EncodedPsbt, SignResult};
pub use types::{FeeEstimate, Protocol, SignMessageProtocol, Utxo};
pub use wallet::{ProviderId, SessionStore, WalletAdapter};
