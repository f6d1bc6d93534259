//! Per-network runner.
//!
//! Each network owns one runner task. Blocks arrive over an mpsc channel and
//! are applied one at a time; sweeps run on timers inside the same task, so
//! every cache write for a network happens on a single writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use sentinel_chain::{BlockPayload, ChainClient, GasStrategy, LogPoller, MulticallBatcher, TransactionExecutor};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::auditor::ConsistencyAuditor;
use crate::baseline::BaselineSync;
use crate::cache::ChainStateCache;
use crate::config::{RuntimeVariables, SentinelConfig, SweepConfig};
use crate::engine::{EvaluationReport, LiquidationEngine};
use crate::error::{SyncError, SyncResult};
use crate::model::NetworkContext;
use crate::ports::{Notifier, PositionStore};
use crate::reserves::ReserveLoader;
use crate::synchronizer::{BlockOutcome, StateSynchronizer};

/// Services a runner needs from the outside.
pub struct RunnerDeps {
    pub client: Arc<dyn ChainClient>,
    pub batcher: Arc<MulticallBatcher>,
    pub store: Arc<dyn PositionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub gas: Box<dyn GasStrategy>,
    pub executor: Option<Arc<TransactionExecutor>>,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct NetworkRunner {
    cache: Arc<ChainStateCache>,
    synchronizer: StateSynchronizer,
    auditor: Arc<ConsistencyAuditor>,
    engine: LiquidationEngine,
    reserves: ReserveLoader,
    baseline: BaselineSync,
    runtime: Arc<RuntimeVariables>,
    sweeps: SweepConfig,
    poller: Option<Arc<LogPoller>>,
}

impl NetworkRunner {
    pub fn new(
        network: Arc<NetworkContext>,
        deps: RunnerDeps,
        runtime: Arc<RuntimeVariables>,
        config: &SentinelConfig,
    ) -> Self {
        let cache = Arc::new(ChainStateCache::new(network));
        let auditor = Arc::new(ConsistencyAuditor::new(cache.clone(), deps.batcher.clone()));
        let engine = LiquidationEngine::new(
            cache.clone(),
            auditor.clone(),
            deps.client,
            deps.gas,
            deps.executor,
            deps.notifier.clone(),
            runtime.clone(),
            config.liquidation.clone(),
        );
        Self {
            synchronizer: StateSynchronizer::new(cache.clone(), deps.store.clone(), runtime.clone()),
            reserves: ReserveLoader::new(cache.clone(), deps.batcher.clone(), deps.notifier),
            baseline: BaselineSync::new(cache.clone(), deps.batcher, deps.store),
            cache,
            auditor,
            engine,
            runtime,
            sweeps: config.sweeps.clone(),
            poller: None,
        }
    }

    /// Keep `poller`'s address filter in line with the reserve list.
    pub fn with_poller(mut self, poller: Arc<LogPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn cache(&self) -> &Arc<ChainStateCache> {
        &self.cache
    }

    pub fn network(&self) -> &Arc<NetworkContext> {
        self.cache.network()
    }

    /// Pool plus every known price feed.
    pub fn watched_addresses(&self) -> Vec<Address> {
        let mut watched = vec![self.network().pool];
        watched.extend(self.cache.aggregator_addresses());
        watched
    }

    fn refresh_watched(&self) {
        if let Some(poller) = &self.poller {
            poller.set_watched(self.watched_addresses());
        }
    }

    /// Load reserves, baseline `seed_users` and run a first evaluation.
    #[instrument(skip(self, seed_users), fields(network = %self.network().name, seeds = seed_users.len()))]
    pub async fn bootstrap(&self, seed_users: &[Address]) -> SyncResult<()> {
        self.reserves.load_reserves().await?;
        self.refresh_watched();

        let baseline = self.baseline.sync_users(seed_users).await?;
        let report = self.engine.check_liquidate_addresses(None).await?;
        info!(
            reserves = self.cache.reserves().len(),
            users = self.cache.user_count(),
            synced = baseline.synced.len(),
            liquidatable = report.liquidatable.len(),
            "Bootstrap complete"
        );
        Ok(())
    }

    /// Apply one block, audit what it touched and evaluate affected users.
    #[instrument(skip(self, block), fields(network = %self.network().name, block = block.number))]
    pub async fn handle_block(&self, block: &BlockPayload) -> SyncResult<BlockOutcome> {
        let outcome = self.synchronizer.process_block(block).await;

        if self.runtime.audit_after_events() && !outcome.audits.is_empty() {
            match self.auditor.check_many(&outcome.audits).await {
                Ok(reports) => {
                    let drifted = reports
                        .iter()
                        .filter(|r| matches!(r, Ok(report) if !report.is_consistent()))
                        .count();
                    if drifted > 0 {
                        warn!(drifted, audited = reports.len(), "Block left cached positions out of line");
                    }
                }
                Err(err) => warn!(error = %err, "Post-block audit failed"),
            }
        }

        if !outcome.affected_users.is_empty() {
            self.engine
                .check_liquidate_addresses(Some(&outcome.affected_users))
                .await?;
        }
        Ok(outcome)
    }

    async fn price_sweep(&self) -> SyncResult<()> {
        let moved = self.reserves.price_sweep().await?;
        let mut holders: Vec<Address> = Vec::new();
        for reserve in moved {
            for holder in self.cache.holders(reserve) {
                if !holders.contains(&holder) {
                    holders.push(holder);
                }
            }
        }
        if !holders.is_empty() {
            self.engine.check_liquidate_addresses(Some(&holders)).await?;
        }
        Ok(())
    }

    async fn reserve_sweep(&self) -> SyncResult<()> {
        let report = self.reserves.reserve_sweep().await?;
        if !report.aggregator_changes.is_empty() || !report.added.is_empty() || !report.removed.is_empty() {
            self.refresh_watched();
        }
        Ok(())
    }

    async fn baseline_sweep(&self) -> SyncResult<()> {
        self.synchronizer.flush_pending().await?;
        let report = self.baseline.sync_unsynced().await?;
        if !report.synced.is_empty() {
            self.engine.check_liquidate_addresses(Some(&report.synced)).await?;
        }
        Ok(())
    }

    async fn evaluation_sweep(&self) -> SyncResult<EvaluationReport> {
        self.engine.check_liquidate_addresses(None).await
    }

    /// Consume blocks until the sender side closes, running sweeps between
    /// blocks. Pending placeholder inserts are flushed before returning.
    pub async fn run(&self, mut blocks: mpsc::Receiver<BlockPayload>) {
        let network = self.network().name.clone();
        info!(%network, "Runner started");

        let mut price = ticker(self.sweeps.price_interval());
        let mut reserve = ticker(self.sweeps.reserve_interval());
        let mut baseline = ticker(self.sweeps.baseline_interval());
        let mut evaluation = ticker(self.sweeps.evaluation_interval());

        loop {
            tokio::select! {
                block = blocks.recv() => {
                    let Some(block) = block else {
                        break;
                    };
                    match self.handle_block(&block).await {
                        Ok(outcome) => debug!(
                            %network,
                            block = outcome.block,
                            mutations = outcome.mutations,
                            gated = outcome.gated,
                            new_users = outcome.new_users.len(),
                            "Block applied"
                        ),
                        Err(err) => error!(%network, block = block.number, error = %err, "Block handling failed"),
                    }
                }
                _ = price.tick() => {
                    if let Err(err) = self.price_sweep().await {
                        warn!(%network, error = %err, "Price sweep failed");
                    }
                }
                _ = reserve.tick() => {
                    if let Err(err) = self.reserve_sweep().await {
                        warn!(%network, error = %err, "Reserve sweep failed");
                    }
                }
                _ = baseline.tick() => {
                    if let Err(err) = self.baseline_sweep().await {
                        warn!(%network, error = %err, "Baseline sweep failed");
                    }
                }
                _ = evaluation.tick() => {
                    match self.evaluation_sweep().await {
                        Ok(report) => debug!(
                            %network,
                            evaluated = report.evaluated,
                            removed = report.removed.len(),
                            liquidatable = report.liquidatable.len(),
                            "Evaluation sweep complete"
                        ),
                        Err(err) => warn!(%network, error = %err, "Evaluation sweep failed"),
                    }
                }
            }
        }

        if let Err(err) = self.synchronizer.flush_pending().await {
            error!(%network, error = %err, "Final placeholder flush failed");
        }
        info!(%network, "Block channel closed, runner stopped");
    }
}

/// Routes inbound blocks to the runner of their network.
#[derive(Debug, Default, Clone)]
pub struct RunnerRegistry {
    senders: HashMap<String, mpsc::Sender<BlockPayload>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, network: impl Into<String>, sender: mpsc::Sender<BlockPayload>) {
        self.senders.insert(network.into(), sender);
    }

    pub fn networks(&self) -> impl Iterator<Item = &str> {
        self.senders.keys().map(String::as_str)
    }

    pub async fn ingest(&self, network: &str, block: BlockPayload) -> SyncResult<()> {
        let sender = self
            .senders
            .get(network)
            .ok_or_else(|| SyncError::UnknownNetwork(network.to_string()))?;
        sender
            .send(block)
            .await
            .map_err(|_| SyncError::Validation(format!("runner for {network} has stopped")))
    }

    /// Decode a JSON block payload and route it.
    pub async fn ingest_json(&self, network: &str, payload: &str) -> SyncResult<()> {
        let block: BlockPayload = serde_json::from_str(payload)
            .map_err(|e| SyncError::Validation(format!("malformed block payload: {e}")))?;
        self.ingest(network, block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fixtures;
    use crate::model::SyncStatus;
    use crate::ports::recording::RecordingNotifier;
    use crate::ports::InMemoryStore;
    use crate::test_support::{FakeAccount, FakePosition, FakeProtocol};
    use alloy::primitives::U256;
    use alloy::sol_types::SolEvent;
    use sentinel_chain::contracts::IPool;
    use sentinel_chain::gas::LegacyGasStrategy;
    use sentinel_chain::{AccountRef, EventLog, UserConfiguration};

    const WETH: Address = Address::repeat_byte(0x10);
    const ALICE: Address = Address::repeat_byte(0x77);
    const BOB: Address = Address::repeat_byte(0x78);

    fn runner(protocol: &Arc<FakeProtocol>) -> (NetworkRunner, Arc<InMemoryStore>) {
        let (chain, batcher) = protocol.batcher();
        let store = Arc::new(InMemoryStore::new());
        let deps = RunnerDeps {
            client: chain,
            batcher,
            store: store.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            gas: Box::new(LegacyGasStrategy::new(1_000_000_000, 10_000_000_000)),
            executor: None,
        };
        let config = SentinelConfig::testing();
        let runtime = Arc::new(RuntimeVariables::from_config(&config));
        (NetworkRunner::new(fixtures::network(), deps, runtime, &config), store)
    }

    fn supply(user: Address, amount: u64, number: u64) -> BlockPayload {
        let data = IPool::Supply {
            reserve: WETH,
            user,
            onBehalfOf: user,
            amount: U256::from(amount),
            referralCode: 0,
        }
        .encode_log_data();
        BlockPayload {
            number,
            hash: None,
            logs: vec![EventLog {
                account: AccountRef {
                    address: fixtures::network().pool,
                },
                topics: data.topics().to_vec(),
                data: data.data,
                index: 0,
                transaction: None,
            }],
        }
    }

    fn alice_onchain(protocol: &FakeProtocol) {
        let mut configuration = UserConfiguration::default();
        configuration.set_using_as_collateral(0, true);
        protocol.set_user_configuration(ALICE, configuration.0);
        protocol.set_position(
            ALICE,
            WETH,
            FakePosition {
                a_token: U256::from(1_000u64),
                collateral: true,
                ..FakePosition::default()
            },
        );
        protocol.set_account(
            ALICE,
            FakeAccount {
                health_factor: U256::MAX,
                ..FakeAccount::default()
            },
        );
    }

    #[tokio::test]
    async fn test_bootstrap_loads_reserves_and_seeds() {
        let protocol = FakeProtocol::new();
        alice_onchain(&protocol);
        let (runner, _) = runner(&protocol);

        runner.bootstrap(&[ALICE]).await.unwrap();

        assert_eq!(runner.cache().reserves().len(), 2);
        assert!(runner.cache().user(ALICE).unwrap().status.is_synced());
        let watched = runner.watched_addresses();
        assert_eq!(watched[0], fixtures::network().pool);
        assert_eq!(watched.len(), 3);
    }

    #[tokio::test]
    async fn test_block_applies_to_synced_user_only() {
        let protocol = FakeProtocol::new();
        alice_onchain(&protocol);
        let (runner, _) = runner(&protocol);
        runner.bootstrap(&[ALICE]).await.unwrap();

        let outcome = runner.handle_block(&supply(ALICE, 500, 11)).await.unwrap();
        assert_eq!(outcome.mutations, 1);
        assert_eq!(
            runner.cache().user_reserve(ALICE, WETH).unwrap().current_a_token_balance,
            U256::from(1_500u64)
        );

        let outcome = runner.handle_block(&supply(BOB, 500, 12)).await.unwrap();
        assert_eq!(outcome.new_users, vec![BOB]);
        assert_eq!(outcome.mutations, 0);
        assert_eq!(runner.cache().user(BOB).unwrap().status, SyncStatus::UNSYNCED);
    }

    #[tokio::test]
    async fn test_run_drains_channel_and_flushes() {
        let protocol = FakeProtocol::new();
        let (runner, store) = runner(&protocol);
        runner.bootstrap(&[]).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(supply(BOB, 1, 20)).await.unwrap();
        tx.send(supply(ALICE, 1, 21)).await.unwrap();
        drop(tx);
        runner.run(rx).await;

        assert!(runner.cache().is_tracked(BOB));
        assert!(runner.cache().is_tracked(ALICE));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_baseline_sweep_syncs_placeholders() {
        let protocol = FakeProtocol::new();
        alice_onchain(&protocol);
        let (runner, _) = runner(&protocol);
        runner.bootstrap(&[]).await.unwrap();
        runner.handle_block(&supply(ALICE, 500, 30)).await.unwrap();

        runner.baseline_sweep().await.unwrap();

        assert!(runner.cache().user(ALICE).unwrap().status.is_synced());
        assert_eq!(
            runner.cache().user_reserve(ALICE, WETH).unwrap().current_a_token_balance,
            U256::from(1_000u64)
        );
    }

    #[tokio::test]
    async fn test_registry_routes_by_network() {
        let mut registry = RunnerRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.register("testnet", tx);

        registry
            .ingest_json("testnet", r#"{"number": 7, "logs": []}"#)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().number, 7);

        let err = registry.ingest_json("othernet", r#"{"number": 7, "logs": []}"#).await;
        assert!(matches!(err, Err(SyncError::UnknownNetwork(name)) if name == "othernet"));
        let err = registry.ingest_json("testnet", "not json").await;
        assert!(matches!(err, Err(SyncError::Validation(_))));
    }
}
