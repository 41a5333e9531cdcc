//! Chain-data providers and the failover manager in front of them.
//!
//! Every provider implements [`DataSource`] and declares which
//! [`Capability`]s it serves. The [`DataSourceManager`] only routes a request
//! to providers that declare the matching capability.

pub mod cache;
pub mod esplora;
pub mod http;
pub mod maestro;
pub mod manager;
pub mod mempool;
pub mod sandshrew;

pub use cache::ResponseCache;
pub use esplora::EsploraDataSource;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use maestro::MaestroDataSource;
pub use manager::{DataSourceManager, PollSettings};
pub use mempool::MempoolSpaceDataSource;
pub use sandshrew::SandshrewDataSource;

use crate::network::NetworkType;
use crate::types::{
    AlkaneOutpoint, FeeEstimate, Inscription, MetaBalance, Protocol, RuneInfo, RuneOutpoint, TransactionInfo, Utxo,
};
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use core::fmt;

pub const MEMPOOL_SPACE: &str = "mempool.space";
pub const ESPLORA: &str = "esplora";
pub const SANDSHREW: &str = "sandshrew";
pub const MAESTRO: &str = "maestro";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Utxos,
    Balance,
    Transaction,
    Fees,
    Broadcast,
    Inscriptions,
    Runes,
    Alkanes,
    Brc20,
}

impl Capability {
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Btc => Capability::Balance,
            Protocol::Brc20 => Capability::Brc20,
            Protocol::Runes => Capability::Runes,
            Protocol::Alkanes => Capability::Alkanes,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Utxos => "utxos",
            Capability::Balance => "balance",
            Capability::Transaction => "transaction lookup",
            Capability::Fees => "fee estimates",
            Capability::Broadcast => "broadcast",
            Capability::Inscriptions => "inscriptions",
            Capability::Runes => "runes",
            Capability::Alkanes => "alkanes",
            Capability::Brc20 => "brc-20",
        };
        f.write_str(name)
    }
}

/// A chain-data provider.
///
/// The network is passed explicitly on every call. Providers hold no
/// per-network state beyond optional endpoint overrides. Optional
/// operations default to `UnsupportedOperation`; the manager never calls
/// them unless the matching capability is declared.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    async fn get_address_utxos(&self, network: NetworkType, address: &str) -> Result<Vec<Utxo>>;

    async fn get_balance(&self, network: NetworkType, address: &str) -> Result<u64>;

    /// `Ok(None)` means the provider has not seen the transaction yet.
    async fn get_transaction(&self, network: NetworkType, txid: &str) -> Result<Option<TransactionInfo>>;

    async fn get_recommended_fees(&self, network: NetworkType) -> Result<FeeEstimate>;

    /// Broadcasts raw transaction hex and returns the txid.
    async fn broadcast_transaction(&self, network: NetworkType, tx_hex: &str) -> Result<String>;

    async fn get_inscriptions(
        &self,
        _network: NetworkType,
        _address: &str,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<Inscription>> {
        Err(LaserEyesError::unsupported(self.name(), "inscriptions"))
    }

    async fn get_meta_balances(
        &self,
        _network: NetworkType,
        _address: &str,
        _protocol: Protocol,
    ) -> Result<Vec<MetaBalance>> {
        Err(LaserEyesError::unsupported(self.name(), "meta balances"))
    }

    async fn get_rune_by_id(&self, _network: NetworkType, _rune_id: &str) -> Result<RuneInfo> {
        Err(LaserEyesError::unsupported(self.name(), "rune lookup"))
    }

    async fn get_rune_outpoints(
        &self,
        _network: NetworkType,
        _address: &str,
        _rune_id: &str,
    ) -> Result<Vec<RuneOutpoint>> {
        Err(LaserEyesError::unsupported(self.name(), "rune outpoints"))
    }

    async fn get_alkanes_by_address(&self, _network: NetworkType, _address: &str) -> Result<Vec<AlkaneOutpoint>> {
        Err(LaserEyesError::unsupported(self.name(), "alkanes"))
    }
}
