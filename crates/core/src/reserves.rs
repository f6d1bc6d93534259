//! Reserve list loading and periodic price/reserve sweeps.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use rust_decimal::Decimal;
use sentinel_chain::contracts::{IERC20Metadata, IPool, IPoolAddressesProvider, IPriceOracle};
use sentinel_chain::{ChainError, ChainResult, MulticallBatcher, RawCall, ReserveConfiguration};
use tracing::{debug, info, instrument, warn};

use crate::cache::ChainStateCache;
use crate::decimal::price_from_oracle;
use crate::error::{SyncError, SyncResult};
use crate::model::Reserve;
use crate::ports::Notifier;

/// Reads issued per reserve: configuration, symbol, price, price source.
const READS_PER_RESERVE: usize = 4;

fn decode<C: SolCall>(result: &ChainResult<Bytes>) -> ChainResult<C::Return> {
    match result {
        Ok(bytes) => C::abi_decode_returns(bytes, true).map_err(|e| ChainError::decode(C::SIGNATURE, e)),
        Err(err) => Err(err.clone()),
    }
}

/// A price feed swap noticed by the reserve sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorChange {
    pub reserve: Address,
    pub symbol: String,
    pub previous: Address,
    pub current: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReserveSweepReport {
    pub reserves: usize,
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
    pub aggregator_changes: Vec<AggregatorChange>,
}

pub struct ReserveLoader {
    cache: Arc<ChainStateCache>,
    batcher: Arc<MulticallBatcher>,
    notifier: Arc<dyn Notifier>,
}

impl ReserveLoader {
    pub fn new(cache: Arc<ChainStateCache>, batcher: Arc<MulticallBatcher>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            cache,
            batcher,
            notifier,
        }
    }

    /// Configured price oracle, or the one the addresses provider names.
    pub async fn resolve_price_oracle(&self) -> SyncResult<Address> {
        let network = self.cache.network();
        if let Some(oracle) = network.price_oracle() {
            return Ok(oracle);
        }
        let oracle = self
            .batcher
            .read(network.addresses_provider, IPoolAddressesProvider::getPriceOracleCall {})
            .await?
            .pop()
            .ok_or_else(|| SyncError::Validation("empty price oracle result".into()))??
            .oracle;
        network.set_price_oracle(oracle);
        info!(network = %network.name, %oracle, "Price oracle resolved");
        Ok(oracle)
    }

    async fn fetch_reserves(&self) -> SyncResult<Vec<Reserve>> {
        let network = self.cache.network();
        let oracle = self.resolve_price_oracle().await?;
        let assets = self
            .batcher
            .read(network.pool, IPool::getReservesListCall {})
            .await?
            .pop()
            .ok_or_else(|| SyncError::Validation("empty reserves list result".into()))??
            .reserves;

        let calls: Vec<RawCall> = assets
            .iter()
            .flat_map(|&asset| {
                [
                    RawCall::new(network.pool, &IPool::getConfigurationCall { asset }),
                    RawCall::new(asset, &IERC20Metadata::symbolCall {}),
                    RawCall::new(oracle, &IPriceOracle::getAssetPriceCall { asset }),
                    RawCall::new(oracle, &IPriceOracle::getSourceOfAssetCall { asset }),
                ]
            })
            .collect();
        let results = self.batcher.aggregate(&calls).await;

        let mut reserves = Vec::with_capacity(assets.len());
        for (index, (asset, reads)) in assets.iter().zip(results.chunks(READS_PER_RESERVE)).enumerate() {
            let configuration = match decode::<IPool::getConfigurationCall>(&reads[0]) {
                Ok(ret) => ReserveConfiguration::decode(ret.data),
                Err(err) => {
                    warn!(reserve = %asset, error = %err, "Reserve configuration unreadable, skipped");
                    continue;
                }
            };
            let symbol = decode::<IERC20Metadata::symbolCall>(&reads[1])
                .map(|ret| ret.value)
                .unwrap_or_else(|err| {
                    debug!(reserve = %asset, error = %err, "Symbol unreadable");
                    asset.to_string()
                });
            let price = match decode::<IPriceOracle::getAssetPriceCall>(&reads[2]) {
                Ok(ret) => price_from_oracle(ret.price),
                Err(err) => {
                    warn!(reserve = %asset, error = %err, "Price unreadable, keeping cached value");
                    self.cache.reserve(*asset).map_or(Decimal::ZERO, |r| r.price_usd)
                }
            };
            let aggregator = decode::<IPriceOracle::getSourceOfAssetCall>(&reads[3])
                .map(|ret| ret.source)
                .unwrap_or_default();

            reserves.push(Reserve::from_configuration(*asset, index, symbol, price, aggregator, &configuration));
        }
        Ok(reserves)
    }

    /// Load every reserve into the cache. Returns the reserve count.
    #[instrument(skip(self), fields(network = %self.cache.network().name))]
    pub async fn load_reserves(&self) -> SyncResult<usize> {
        let reserves = self.fetch_reserves().await?;
        for reserve in &reserves {
            debug!(
                reserve = %reserve.address,
                symbol = %reserve.symbol,
                decimals = reserve.decimals,
                price = %reserve.price_usd,
                lt = reserve.liquidation_threshold,
                bonus = reserve.liquidation_bonus,
                "Reserve loaded"
            );
        }
        let count = reserves.len();
        self.cache.set_reserves(reserves);
        info!(reserves = count, "Reserves loaded");
        Ok(count)
    }

    /// Refresh prices only. Returns reserves whose price moved.
    #[instrument(skip(self), fields(network = %self.cache.network().name))]
    pub async fn price_sweep(&self) -> SyncResult<Vec<Address>> {
        let oracle = self.resolve_price_oracle().await?;
        let assets = self.cache.reserve_addresses();
        if assets.is_empty() {
            return Ok(Vec::new());
        }
        let calls: Vec<IPriceOracle::getAssetPriceCall> = assets
            .iter()
            .map(|&asset| IPriceOracle::getAssetPriceCall { asset })
            .collect();
        let prices = self
            .batcher
            .read::<IPriceOracle::getAssetPriceCall>(oracle, calls)
            .await?;

        let mut moved = Vec::new();
        for (asset, price) in assets.into_iter().zip(prices) {
            match price {
                Ok(ret) => {
                    let price = price_from_oracle(ret.price);
                    if let Some(previous) = self.cache.update_price(asset, price) {
                        if previous != price {
                            debug!(reserve = %asset, %previous, %price, "Price moved");
                            moved.push(asset);
                        }
                    }
                }
                Err(err) => warn!(reserve = %asset, error = %err, "Price read failed"),
            }
        }
        info!(moved = moved.len(), "Price sweep complete");
        Ok(moved)
    }

    /// Reload every reserve field and alert on price feed changes.
    #[instrument(skip(self), fields(network = %self.cache.network().name))]
    pub async fn reserve_sweep(&self) -> SyncResult<ReserveSweepReport> {
        let fresh = self.fetch_reserves().await?;
        let mut report = ReserveSweepReport {
            reserves: fresh.len(),
            ..ReserveSweepReport::default()
        };

        for reserve in &fresh {
            let Some(cached) = self.cache.reserve(reserve.address) else {
                info!(reserve = %reserve.address, symbol = %reserve.symbol, "Reserve listed");
                report.added.push(reserve.address);
                continue;
            };
            if cached.aggregator != reserve.aggregator {
                report.aggregator_changes.push(AggregatorChange {
                    reserve: reserve.address,
                    symbol: reserve.symbol.clone(),
                    previous: cached.aggregator,
                    current: reserve.aggregator,
                });
            }
            if cached.liquidation_threshold != reserve.liquidation_threshold
                || cached.liquidation_bonus != reserve.liquidation_bonus
                || cached.index != reserve.index
            {
                info!(
                    reserve = %reserve.address,
                    lt = reserve.liquidation_threshold,
                    previous_lt = cached.liquidation_threshold,
                    bonus = reserve.liquidation_bonus,
                    index = reserve.index,
                    previous_index = cached.index,
                    "Reserve parameters changed"
                );
            }
        }
        for address in self.cache.reserve_addresses() {
            if !fresh.iter().any(|r| r.address == address) {
                info!(reserve = %address, "Reserve delisted");
                report.removed.push(address);
            }
        }

        for change in &report.aggregator_changes {
            warn!(
                reserve = %change.reserve,
                symbol = %change.symbol,
                previous = %change.previous,
                current = %change.current,
                "Price feed changed"
            );
            let body = format!(
                "{} on {}: aggregator {} replaced by {}",
                change.symbol,
                self.cache.network().name,
                change.previous,
                change.current
            );
            if let Err(err) = self.notifier.send_alert("Price feed changed", &body).await {
                warn!(error = %err, "Alert delivery failed");
            }
        }

        self.cache.set_reserves(fresh);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fixtures;
    use crate::ports::recording::RecordingNotifier;
    use crate::test_support::FakeProtocol;
    use alloy::primitives::U256;

    const WETH: Address = Address::repeat_byte(0x10);

    fn loader(protocol: &Arc<FakeProtocol>) -> (ReserveLoader, Arc<ChainStateCache>, Arc<RecordingNotifier>) {
        let (_, batcher) = protocol.batcher();
        let cache = Arc::new(ChainStateCache::new(fixtures::network()));
        let notifier = Arc::new(RecordingNotifier::default());
        (ReserveLoader::new(cache.clone(), batcher, notifier.clone()), cache, notifier)
    }

    #[tokio::test]
    async fn test_load_reserves_in_pool_order() {
        let protocol = FakeProtocol::new();
        let (loader, cache, _) = loader(&protocol);

        assert_eq!(loader.load_reserves().await.unwrap(), 2);

        let reserves = cache.reserves();
        assert_eq!(reserves[0].symbol, "WETH");
        assert_eq!(reserves[0].decimals, 18);
        assert_eq!(reserves[0].price_usd, fixtures::dec("2000"));
        assert_eq!(reserves[0].liquidation_threshold, 8250);
        assert_eq!(reserves[0].liquidation_protocol_fee, 1000);
        assert!(reserves[0].is_active);
        assert_eq!(reserves[1].symbol, "USDC");
        assert_eq!(reserves[1].index, 1);
        assert_eq!(cache.reserve_by_aggregator(Address::repeat_byte(0x50)), Some(WETH));
    }

    #[tokio::test]
    async fn test_skipped_reserve_keeps_later_indices() {
        let protocol = FakeProtocol::new();
        let broken = Address::repeat_byte(0x30);
        {
            let mut reserves = protocol.reserves.lock();
            let mut reserve = reserves[0].clone();
            reserve.address = broken;
            reserve.symbol = "BRKN".into();
            reserves.insert(1, reserve);
        }
        protocol.unreadable_configurations.lock().insert(broken);
        let (loader, cache, _) = loader(&protocol);

        assert_eq!(loader.load_reserves().await.unwrap(), 2);

        assert!(cache.reserve(broken).is_none());
        assert!(cache.reserve_at(1).is_none());
        let usdc = cache.reserve_at(2).unwrap();
        assert_eq!(usdc.symbol, "USDC");
        assert_eq!(usdc.index, 2);
    }

    #[tokio::test]
    async fn test_price_oracle_resolved_lazily() {
        let protocol = FakeProtocol::new();
        let (_, batcher) = protocol.batcher();
        let network = Arc::new(
            crate::model::NetworkContext::new(
                "testnet",
                1,
                "http://localhost:8545",
                protocol.network.pool,
                protocol.network.data_provider,
                protocol.network.addresses_provider,
                protocol.network.multicall,
                protocol.network.wrapped_native,
            ),
        );
        let cache = Arc::new(ChainStateCache::new(network.clone()));
        let loader = ReserveLoader::new(cache, batcher, Arc::new(RecordingNotifier::default()));

        assert_eq!(loader.resolve_price_oracle().await.unwrap(), protocol.oracle);
        assert_eq!(network.price_oracle(), Some(protocol.oracle));
    }

    #[tokio::test]
    async fn test_price_sweep_reports_moves() {
        let protocol = FakeProtocol::new();
        let (loader, cache, _) = loader(&protocol);
        loader.load_reserves().await.unwrap();

        protocol.reserves.lock()[0].price = U256::from(1_800_00000000u64);
        let moved = loader.price_sweep().await.unwrap();

        assert_eq!(moved, vec![WETH]);
        assert_eq!(cache.reserve(WETH).unwrap().price_usd, fixtures::dec("1800"));
    }

    #[tokio::test]
    async fn test_reserve_sweep_alerts_on_feed_change() {
        let protocol = FakeProtocol::new();
        let (loader, cache, notifier) = loader(&protocol);
        loader.load_reserves().await.unwrap();

        let new_feed = Address::repeat_byte(0x99);
        protocol.reserves.lock()[0].source = new_feed;
        let report = loader.reserve_sweep().await.unwrap();

        assert_eq!(report.aggregator_changes.len(), 1);
        assert_eq!(report.aggregator_changes[0].current, new_feed);
        assert_eq!(notifier.alerts.lock().len(), 1);
        assert_eq!(notifier.alerts.lock()[0].0, "Price feed changed");
        assert_eq!(cache.reserve_by_aggregator(new_feed), Some(WETH));
    }

    #[tokio::test]
    async fn test_reserve_sweep_unchanged_is_quiet() {
        let protocol = FakeProtocol::new();
        let (loader, _, notifier) = loader(&protocol);
        loader.load_reserves().await.unwrap();

        let report = loader.reserve_sweep().await.unwrap();
        assert!(report.aggregator_changes.is_empty());
        assert!(report.added.is_empty() && report.removed.is_empty());
        assert!(notifier.alerts.lock().is_empty());
    }
}
