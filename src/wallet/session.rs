//! Persisted wallet sessions and the active-wallet connection lifecycle.

use super::{ProviderId, WalletAccount, WalletAdapter};
use crate::network::NetworkType;
use crate::{LaserEyesError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// What is remembered about a connected wallet between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub address: String,
    pub payment_address: String,
    pub public_key: String,
    pub payment_public_key: String,
    #[serde(default)]
    pub balance: Option<u64>,
}

impl Session {
    pub fn account(&self) -> WalletAccount {
        WalletAccount {
            address: self.address.clone(),
            public_key: self.public_key.clone(),
            payment_address: self.payment_address.clone(),
            payment_public_key: self.payment_public_key.clone(),
        }
    }

    /// True when both addresses are encoded for `network`.
    pub fn matches_network(&self, network: NetworkType) -> bool {
        network.accepts_address(&self.address) && network.accepts_address(&self.payment_address)
    }
}

impl From<&WalletAccount> for Session {
    fn from(account: &WalletAccount) -> Self {
        Session {
            address: account.address.clone(),
            payment_address: account.payment_address.clone(),
            public_key: account.public_key.clone(),
            payment_public_key: account.payment_public_key.clone(),
            balance: None,
        }
    }
}

/// Per-provider session persistence.
pub trait SessionStore: Send + Sync {
    fn get(&self, provider: ProviderId) -> Result<Option<Session>>;
    fn put(&self, provider: ProviderId, session: &Session) -> Result<()>;
    fn clear(&self, provider: ProviderId) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<ProviderId, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> LaserEyesError {
    LaserEyesError::Storage("session store lock poisoned".to_string())
}

impl SessionStore for MemorySessionStore {
    fn get(&self, provider: ProviderId) -> Result<Option<Session>> {
        Ok(self.sessions.lock().map_err(poisoned)?.get(&provider).cloned())
    }

    fn put(&self, provider: ProviderId, session: &Session) -> Result<()> {
        self.sessions.lock().map_err(poisoned)?.insert(provider, session.clone());
        Ok(())
    }

    fn clear(&self, provider: ProviderId) -> Result<()> {
        self.sessions.lock().map_err(poisoned)?.remove(&provider);
        Ok(())
    }
}

/// One JSON file per provider under a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, provider: ProviderId) -> PathBuf {
        self.dir.join(format!("lasereyes-{}.json", provider.as_str()))
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, provider: ProviderId) -> Result<Option<Session>> {
        let path = self.path(provider);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&contents) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                log::warn!("[SessionStore] Ignoring unreadable session {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn put(&self, provider: ProviderId, session: &Session) -> Result<()> {
        let contents = serde_json::to_string_pretty(session)?;
        std::fs::write(self.path(provider), contents)?;
        Ok(())
    }

    fn clear(&self, provider: ProviderId) -> Result<()> {
        let path = self.path(provider);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// A connected wallet: its adapter, the account it handed out and the
/// store its session is persisted in.
pub struct ActiveWallet {
    adapter: Arc<dyn WalletAdapter>,
    store: Arc<dyn SessionStore>,
    session: Session,
    network: NetworkType,
}

impl ActiveWallet {
    /// Restores a persisted session when it was made for `network`;
    /// otherwise runs the wallet's connect flow and persists the result.
    pub async fn connect(
        adapter: Arc<dyn WalletAdapter>,
        store: Arc<dyn SessionStore>,
        network: NetworkType,
    ) -> Result<Self> {
        let provider = adapter.id();
        if let Some(session) = store.get(provider)? {
            if session.matches_network(network) {
                log::info!("[{}Wallet] Restored session for {}", provider, session.address);
                return Ok(Self {
                    adapter,
                    store,
                    session,
                    network,
                });
            }
            log::info!("[{}Wallet] Discarding session made for another network", provider);
            store.clear(provider)?;
        }

        let account = adapter.connect(network).await?;
        let session = Session::from(&account);
        store.put(provider, &session)?;
        log::info!("[{}Wallet] Connected {} on {}", provider, session.address, network);
        Ok(Self {
            adapter,
            store,
            session,
            network,
        })
    }

    pub fn provider(&self) -> ProviderId {
        self.adapter.id()
    }

    pub fn adapter(&self) -> &Arc<dyn WalletAdapter> {
        &self.adapter
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn account(&self) -> WalletAccount {
        self.session.account()
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    pub fn set_balance(&mut self, balance: u64) -> Result<()> {
        self.session.balance = Some(balance);
        self.store.put(self.provider(), &self.session)
    }

    /// Disconnects the wallet and drops its persisted session.
    pub async fn disconnect(self) -> Result<()> {
        let provider = self.provider();
        self.store.clear(provider)?;
        self.adapter.disconnect().await?;
        log::info!("[{}Wallet] Disconnected", provider);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(address: &str) -> Session {
        Session {
            address: address.to_string(),
            payment_address: address.to_string(),
            public_key: "02".to_string() + &"11".repeat(32),
            payment_public_key: "02".to_string() + &"11".repeat(32),
            balance: Some(10),
        }
    }

    #[test]
    fn file_store_persists_per_provider() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        let s = session("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");

        store.put(ProviderId::Unisat, &s).unwrap();
        assert!(dir.path().join("lasereyes-unisat.json").exists());
        assert_eq!(store.get(ProviderId::Unisat).unwrap(), Some(s));
        assert_eq!(store.get(ProviderId::Xverse).unwrap(), None);

        store.clear(ProviderId::Unisat).unwrap();
        assert_eq!(store.get(ProviderId::Unisat).unwrap(), None);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lasereyes-oyl.json"), "{not json").unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        assert_eq!(store.get(ProviderId::Oyl).unwrap(), None);
    }

    #[test]
    fn session_network_check_uses_both_addresses() {
        let mut s = session("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
        assert!(s.matches_network(NetworkType::Mainnet));
        s.payment_address = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string();
        assert!(!s.matches_network(NetworkType::Mainnet));
    }
}
