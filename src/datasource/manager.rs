//! Capability-routed failover across the configured data sources.

use super::cache::ResponseCache;
use super::http::{HttpClient, ReqwestHttpClient};
use super::{
    Capability, DataSource, EsploraDataSource, MaestroDataSource, MempoolSpaceDataSource, SandshrewDataSource,
};
use crate::config::{Config, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::network::NetworkType;
use crate::time::{TimeProvider, TokioTime};
use crate::types::{
    AlkaneOutpoint, FeeEstimate, Inscription, MetaBalance, Protocol, RuneInfo, RuneOutpoint, TransactionInfo, Utxo,
};
use crate::{LaserEyesError, LaserEyesErrorKind, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const PRIORITY_MAESTRO: u32 = 10;
pub const PRIORITY_SANDSHREW: u32 = 20;
pub const PRIORITY_MEMPOOL: u32 = 30;
pub const PRIORITY_ESPLORA: u32 = 40;

/// Interval and bound of the long-poll helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

struct RegisteredSource {
    source: Arc<dyn DataSource>,
    priority: u32,
}

/// Routes each read to the providers that declare the matching capability,
/// in priority order, and only fails once every candidate has failed.
pub struct DataSourceManager {
    sources: Vec<RegisteredSource>,
    cache: Option<ResponseCache>,
    poll: PollSettings,
    request_timeout: Duration,
    time: Arc<dyn TimeProvider>,
}

impl Default for DataSourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSourceManager {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            cache: None,
            poll: PollSettings::default(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            time: Arc::new(TokioTime),
        }
    }

    /// Builds the provider set described by `config` over reqwest.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = ReqwestHttpClient::new(config.request_timeout())?;
        Ok(Self::from_config_with_http(config, Arc::new(http)))
    }

    pub fn from_config_with_http(config: &Config, http: Arc<dyn HttpClient>) -> Self {
        let mut manager = Self::new().with_request_timeout(config.request_timeout());
        let sources = &config.data_sources;

        if let Some(maestro) = &sources.maestro {
            manager.register(Arc::new(MaestroDataSource::new(http.clone(), maestro.api_key.clone())), PRIORITY_MAESTRO);
        }
        if let Some(sandshrew) = &sources.sandshrew {
            let mut source = SandshrewDataSource::new(http.clone()).with_api_key(config.sandshrew_api_key());
            if let Some(url) = &sandshrew.url {
                source = source.with_url(url.clone());
            }
            manager.register(Arc::new(source), PRIORITY_SANDSHREW);
        }
        if let Some(mempool) = &sources.mempool {
            let mut source = MempoolSpaceDataSource::new(http.clone());
            if let Some(url) = &mempool.url {
                source = source.with_url(config.network, url.clone());
            }
            manager.register(Arc::new(source), PRIORITY_MEMPOOL);
        }
        if let Some(url) = &sources.esplora {
            manager.register(Arc::new(EsploraDataSource::new(http.clone(), url.clone())), PRIORITY_ESPLORA);
        }
        if manager.sources.is_empty() {
            log::info!("[DataSourceManager] No data sources configured, using mempool.space and sandshrew");
            manager.register(Arc::new(SandshrewDataSource::new(http.clone())), PRIORITY_SANDSHREW);
            manager.register(Arc::new(MempoolSpaceDataSource::new(http)), PRIORITY_MEMPOOL);
        }
        if let Some(options) = &config.cache_options {
            manager.cache = Some(ResponseCache::from_options(options));
        }
        manager
    }

    /// Adds a provider. Lower `priority` values are tried first; equal
    /// priorities keep registration order.
    pub fn register(&mut self, source: Arc<dyn DataSource>, priority: u32) {
        log::debug!("[DataSourceManager] Registered {} at priority {}", source.name(), priority);
        self.sources.push(RegisteredSource { source, priority });
        self.sources.sort_by_key(|s| s.priority);
    }

    pub fn with_source(mut self, source: Arc<dyn DataSource>, priority: u32) -> Self {
        self.register(source, priority);
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Bound on a single provider call. A call that exceeds it counts as a
    /// failure of that provider.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    pub fn poll_settings(&self) -> PollSettings {
        self.poll
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.source.name()).collect()
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.sources
            .iter()
            .find(|s| s.source.name() == name)
            .map(|s| s.source.clone())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Providers eligible for `capability`. An explicit override restricts
    /// the candidates to that one provider.
    fn candidates(&self, capability: Capability, source: Option<&str>) -> Result<Vec<Arc<dyn DataSource>>> {
        let candidates: Vec<Arc<dyn DataSource>> = self
            .sources
            .iter()
            .filter(|s| source.map_or(true, |name| s.source.name() == name))
            .filter(|s| s.source.supports(capability))
            .map(|s| s.source.clone())
            .collect();
        if candidates.is_empty() {
            return Err(LaserEyesError::NoCapableProvider(match source {
                Some(name) => format!("{capability} (requested provider {name})"),
                None => capability.to_string(),
            }));
        }
        Ok(candidates)
    }

    async fn with_failover<T, F, Fut>(
        &self,
        capability: Capability,
        source: Option<&str>,
        operation: &str,
        f: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn DataSource>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = self.candidates(capability, source)?;
        let mut failures = Vec::with_capacity(candidates.len());
        let mut all_not_found = true;
        let mut last_not_found = None;
        for ds in candidates {
            let outcome = match tokio::time::timeout(self.request_timeout, f(ds.clone())).await {
                Ok(outcome) => outcome,
                Err(_) => Err(LaserEyesError::Network(format!(
                    "no response within {}ms",
                    self.request_timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    log::warn!("[DataSourceManager] {} failed on {}: {}", operation, ds.name(), e);
                    failures.push(format!("{}: {}", ds.name(), e));
                    if e.kind() == LaserEyesErrorKind::AssetNotFound {
                        last_not_found = Some(e);
                    } else {
                        all_not_found = false;
                    }
                }
            }
        }
        // every provider agrees the asset does not exist
        match last_not_found {
            Some(e) if all_not_found => Err(e),
            _ => Err(LaserEyesError::ProviderError(failures)),
        }
    }

    fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.as_ref().and_then(|c| c.get(key))
    }

    fn store<T: serde::Serialize>(&self, key: String, value: &T) {
        if let Some(cache) = &self.cache {
            cache.put(key, value);
        }
    }

    pub async fn get_balance(&self, network: NetworkType, address: &str, source: Option<&str>) -> Result<u64> {
        let key = format!("balance:{network}:{address}");
        if let Some(balance) = self.cached(&key) {
            return Ok(balance);
        }
        let balance = self
            .with_failover(Capability::Balance, source, "get_balance", |ds| async move {
                ds.get_balance(network, address).await
            })
            .await?;
        self.store(key, &balance);
        Ok(balance)
    }

    /// Never cached: spends must see the current UTXO set.
    pub async fn get_address_utxos(
        &self,
        network: NetworkType,
        address: &str,
        source: Option<&str>,
    ) -> Result<Vec<Utxo>> {
        self.with_failover(Capability::Utxos, source, "get_address_utxos", |ds| async move {
            ds.get_address_utxos(network, address).await
        })
        .await
    }

    pub async fn get_transaction(
        &self,
        network: NetworkType,
        txid: &str,
        source: Option<&str>,
    ) -> Result<Option<TransactionInfo>> {
        self.with_failover(Capability::Transaction, source, "get_transaction", |ds| async move {
            ds.get_transaction(network, txid).await
        })
        .await
    }

    pub async fn get_recommended_fees(&self, network: NetworkType, source: Option<&str>) -> Result<FeeEstimate> {
        self.with_failover(Capability::Fees, source, "get_recommended_fees", |ds| async move {
            ds.get_recommended_fees(network).await
        })
        .await
    }

    /// Fee rate in sat/vB for a confirmation target.
    pub async fn estimate_fee(&self, network: NetworkType, target_blocks: u32, source: Option<&str>) -> Result<f64> {
        let fees = self.get_recommended_fees(network, source).await?;
        Ok(if target_blocks <= 1 { fees.fast_fee } else { fees.min_fee })
    }

    pub async fn get_inscriptions(
        &self,
        network: NetworkType,
        address: &str,
        offset: usize,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<Inscription>> {
        let key = format!("inscriptions:{network}:{address}:{offset}:{limit}");
        if let Some(inscriptions) = self.cached(&key) {
            return Ok(inscriptions);
        }
        let inscriptions = self
            .with_failover(Capability::Inscriptions, source, "get_inscriptions", |ds| async move {
                ds.get_inscriptions(network, address, offset, limit).await
            })
            .await?;
        self.store(key, &inscriptions);
        Ok(inscriptions)
    }

    /// Token balances under `protocol`. BTC is answered from the plain
    /// balance so callers can treat every protocol the same way.
    pub async fn get_meta_balances(
        &self,
        network: NetworkType,
        address: &str,
        protocol: Protocol,
        source: Option<&str>,
    ) -> Result<Vec<MetaBalance>> {
        if protocol == Protocol::Btc {
            let sats = self.get_balance(network, address, source).await?;
            return Ok(vec![MetaBalance {
                protocol: Protocol::Btc,
                id: "btc".to_string(),
                name: "Bitcoin".to_string(),
                balance: sats.to_string(),
                symbol: Some("BTC".to_string()),
                divisibility: Some(8),
            }]);
        }
        let key = format!("meta:{network}:{protocol}:{address}");
        if let Some(balances) = self.cached(&key) {
            return Ok(balances);
        }
        let balances = self
            .with_failover(Capability::for_protocol(protocol), source, "get_meta_balances", |ds| async move {
                ds.get_meta_balances(network, address, protocol).await
            })
            .await?;
        self.store(key, &balances);
        Ok(balances)
    }

    pub async fn get_rune_by_id(&self, network: NetworkType, rune_id: &str, source: Option<&str>) -> Result<RuneInfo> {
        let key = format!("rune:{network}:{rune_id}");
        if let Some(rune) = self.cached(&key) {
            return Ok(rune);
        }
        let rune = self
            .with_failover(Capability::Runes, source, "get_rune_by_id", |ds| async move {
                ds.get_rune_by_id(network, rune_id).await
            })
            .await?;
        self.store(key, &rune);
        Ok(rune)
    }

    pub async fn get_rune_outpoints(
        &self,
        network: NetworkType,
        address: &str,
        rune_id: &str,
        source: Option<&str>,
    ) -> Result<Vec<RuneOutpoint>> {
        self.with_failover(Capability::Runes, source, "get_rune_outpoints", |ds| async move {
            ds.get_rune_outpoints(network, address, rune_id).await
        })
        .await
    }

    pub async fn get_alkanes_by_address(
        &self,
        network: NetworkType,
        address: &str,
        source: Option<&str>,
    ) -> Result<Vec<AlkaneOutpoint>> {
        self.with_failover(Capability::Alkanes, source, "get_alkanes_by_address", |ds| async move {
            ds.get_alkanes_by_address(network, address).await
        })
        .await
    }

    /// Pushes raw transaction hex through the first provider that accepts it.
    pub async fn broadcast_transaction(&self, network: NetworkType, tx_hex: &str, source: Option<&str>) -> Result<String> {
        let result = self
            .with_failover(Capability::Broadcast, source, "broadcast_transaction", |ds| async move {
                ds.broadcast_transaction(network, tx_hex).await
            })
            .await;
        match result {
            Ok(txid) => {
                log::info!("[DataSourceManager] Broadcast transaction {}", txid);
                Ok(txid)
            }
            Err(LaserEyesError::ProviderError(failures)) => Err(LaserEyesError::BroadcastFailed(failures.join("; "))),
            Err(e) => Err(e),
        }
    }

    /// Polls until `txid` is visible to a provider. Returns `Ok(false)` once
    /// the poll timeout elapses; lookup errors count as "not yet visible".
    pub async fn wait_for_transaction(&self, network: NetworkType, txid: &str) -> Result<bool> {
        let found = self
            .poll_transaction(network, txid, |tx| Some(tx.txid.clone()))
            .await?;
        Ok(found.is_some())
    }

    /// Polls until `txid` is visible and returns the value of output `vout`,
    /// or `Ok(None)` on timeout.
    pub async fn get_output_value_by_vout_index(&self, network: NetworkType, txid: &str, vout: usize) -> Result<Option<u64>> {
        self.poll_transaction(network, txid, |tx| tx.outputs.get(vout).map(|o| o.value))
            .await
    }

    async fn poll_transaction<T>(
        &self,
        network: NetworkType,
        txid: &str,
        extract: impl Fn(&TransactionInfo) -> Option<T>,
    ) -> Result<Option<T>> {
        let started = Instant::now();
        let deadline = started + self.poll.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // lookups share the poll deadline, so a stalled provider cannot extend it
            match tokio::time::timeout(remaining, self.get_transaction(network, txid, None)).await {
                Ok(Ok(Some(tx))) => {
                    if let Some(value) = extract(&tx) {
                        return Ok(Some(value));
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e @ LaserEyesError::NoCapableProvider(_))) => return Err(e),
                Ok(Err(e)) => log::debug!("[DataSourceManager] {} not visible yet: {}", txid, e),
                Err(_) => log::debug!("[DataSourceManager] Lookup of {} outlived the poll deadline", txid),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!(
                    "[DataSourceManager] Gave up waiting for {} after {}ms",
                    txid,
                    started.elapsed().as_millis()
                );
                return Ok(None);
            }
            self.time.sleep_ms(self.poll.interval.min(remaining).as_millis() as u64).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::http::{HttpRequest, HttpResponse};
    use crate::mock::MockDataSource;
    use crate::types::TxOutputInfo;
    use async_trait::async_trait;

    /// Transport whose requests never complete.
    struct StalledHttp;

    #[async_trait]
    impl HttpClient for StalledHttp {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            std::future::pending().await
        }
    }

    fn stalled_mempool() -> Arc<dyn DataSource> {
        Arc::new(MempoolSpaceDataSource::new(Arc::new(StalledHttp)))
    }

    const ADDRESS: &str = "bc1qtest";

    fn manager_with(sources: Vec<MockDataSource>) -> DataSourceManager {
        let mut manager = DataSourceManager::new();
        for (i, source) in sources.into_iter().enumerate() {
            manager.register(Arc::new(source), i as u32);
        }
        manager
    }

    #[tokio::test]
    async fn failing_provider_falls_through_to_next() {
        let a = MockDataSource::new("a").failing();
        let b = MockDataSource::new("b").with_balance(ADDRESS, 42_000);
        let manager = manager_with(vec![a, b]);

        let balance = manager.get_balance(NetworkType::Mainnet, ADDRESS, None).await.unwrap();
        assert_eq!(balance, 42_000);
    }

    #[tokio::test]
    async fn all_failures_are_aggregated() {
        let manager = manager_with(vec![MockDataSource::new("a").failing(), MockDataSource::new("b").failing()]);
        let err = manager.get_address_utxos(NetworkType::Mainnet, ADDRESS, None).await.unwrap_err();
        match err {
            LaserEyesError::ProviderError(failures) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("a:"));
                assert!(failures[1].starts_with("b:"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn providers_without_capability_are_skipped() {
        let basic = MockDataSource::new("basic")
            .with_capabilities(&[Capability::Utxos, Capability::Balance]);
        let runes = MockDataSource::new("runes").with_rune(RuneInfo {
            id: "840000:3".into(),
            name: "DOG•GO•TO•THE•MOON".into(),
            divisibility: 5,
            symbol: Some("🐕".into()),
        });
        let manager = manager_with(vec![basic.clone(), runes]);

        let rune = manager.get_rune_by_id(NetworkType::Mainnet, "840000:3", None).await.unwrap();
        assert_eq!(rune.divisibility, 5);
        assert_eq!(basic.call_count(), 0);
    }

    #[tokio::test]
    async fn explicit_source_is_exclusive() {
        let a = MockDataSource::new("a").with_balance(ADDRESS, 1);
        let b = MockDataSource::new("b").failing();
        let manager = manager_with(vec![a, b]);

        let err = manager.get_balance(NetworkType::Mainnet, ADDRESS, Some("b")).await.unwrap_err();
        assert!(matches!(err, LaserEyesError::ProviderError(_)));
        let err = manager.get_balance(NetworkType::Mainnet, ADDRESS, Some("nope")).await.unwrap_err();
        assert!(matches!(err, LaserEyesError::NoCapableProvider(_)));
    }

    #[tokio::test]
    async fn exhausted_broadcast_reports_broadcast_failed() {
        let manager = manager_with(vec![MockDataSource::new("a").failing()]);
        let err = manager.broadcast_transaction(NetworkType::Mainnet, "00", None).await.unwrap_err();
        assert_eq!(err.kind(), LaserEyesErrorKind::BroadcastFailed);
    }

    #[tokio::test]
    async fn cache_serves_repeat_balance_reads() {
        let source = MockDataSource::new("a").with_balance(ADDRESS, 7);
        let manager = DataSourceManager::new()
            .with_source(Arc::new(source.clone()), 0)
            .with_cache(ResponseCache::new(Duration::from_secs(30), 16));

        manager.get_balance(NetworkType::Mainnet, ADDRESS, None).await.unwrap();
        manager.get_balance(NetworkType::Mainnet, ADDRESS, None).await.unwrap();
        assert_eq!(source.call_count(), 1);

        manager.get_address_utxos(NetworkType::Mainnet, ADDRESS, None).await.unwrap();
        manager.get_address_utxos(NetworkType::Mainnet, ADDRESS, None).await.unwrap();
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_transaction_times_out_with_false() {
        let manager = manager_with(vec![MockDataSource::new("a")]);
        let started = tokio::time::Instant::now();

        let seen = manager.wait_for_transaction(NetworkType::Mainnet, &"ee".repeat(32)).await.unwrap();

        assert!(!seen);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed <= Duration::from_secs(66));
    }

    #[tokio::test(start_paused = true)]
    async fn output_value_is_read_once_visible() {
        let source = MockDataSource::new("a");
        let manager = manager_with(vec![source.clone()]);
        source.insert_transaction(TransactionInfo {
            txid: "ff".repeat(32),
            confirmed: false,
            block_height: None,
            outputs: vec![TxOutputInfo {
                value: 3_579,
                script_pub_key: String::new(),
                address: None,
            }],
        });

        let value = manager
            .get_output_value_by_vout_index(NetworkType::Mainnet, &"ff".repeat(32), 0)
            .await
            .unwrap();
        assert_eq!(value, Some(3_579));
        let missing = manager
            .get_output_value_by_vout_index(NetworkType::Mainnet, &"ff".repeat(32), 5)
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_provider_cannot_outlast_the_poll_deadline() {
        let manager = DataSourceManager::new()
            .with_source(stalled_mempool(), 1)
            .with_request_timeout(Duration::from_secs(600));
        let started = tokio::time::Instant::now();

        let seen = manager.wait_for_transaction(NetworkType::Mainnet, &"ee".repeat(32)).await.unwrap();

        assert!(!seen);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(65), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_provider_fails_over_after_request_timeout() {
        let fallback = MockDataSource::new("fallback").with_balance(ADDRESS, 9_000);
        let manager = DataSourceManager::new()
            .with_source(stalled_mempool(), 1)
            .with_source(Arc::new(fallback.clone()), 2)
            .with_request_timeout(Duration::from_secs(5));
        let started = tokio::time::Instant::now();

        let balance = manager.get_balance(NetworkType::Mainnet, ADDRESS, None).await.unwrap();

        assert_eq!(balance, 9_000);
        assert_eq!(fallback.call_count(), 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
