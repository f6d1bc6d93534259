//! Baseline loading of users from authoritative reads.
//!
//! A user becomes eligible for event deltas only once its configuration and
//! every flagged position have been read from the chain. Reads for many
//! users share batched multicalls; a user whose reads fail stays unsynced and
//! is retried on the next sweep.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use rust_decimal::Decimal;
use sentinel_chain::contracts::{IPool, IPoolDataProvider};
use sentinel_chain::{ChainResult, MulticallBatcher, UserConfiguration};
use tracing::{debug, info, instrument, warn};

use crate::auditor::onchain_position;
use crate::cache::ChainStateCache;
use crate::decimal::{to_decimal, HEALTH_FACTOR_DECIMALS, PRICE_DECIMALS};
use crate::error::SyncResult;
use crate::model::{SyncStatus, UserAddress, UserReserve};
use crate::ports::{to_record, PositionStore, RecordKey, Upsert, UpsertSummary};

const USER_UPDATE_FIELDS: &[&str] = &[
    "configuration",
    "total_collateral_base",
    "total_debt_base",
    "current_liquidation_threshold",
    "health_factor",
    "status",
    "updated_at",
];

const POSITION_UPDATE_FIELDS: &[&str] = &[
    "current_a_token_balance",
    "current_stable_debt",
    "current_variable_debt",
    "usage_as_collateral_enabled",
    "status",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineReport {
    pub synced: Vec<Address>,
    pub failed: Vec<Address>,
    pub positions: usize,
    pub stored: UpsertSummary,
}

/// Account aggregates as the pool reports them.
#[derive(Debug, Clone, Copy)]
struct AccountData {
    configuration: UserConfiguration,
    collateral_base: Decimal,
    debt_base: Decimal,
    liquidation_threshold: Decimal,
    health_factor: Decimal,
}

pub struct BaselineSync {
    cache: Arc<ChainStateCache>,
    batcher: Arc<MulticallBatcher>,
    store: Arc<dyn PositionStore>,
}

impl BaselineSync {
    pub fn new(cache: Arc<ChainStateCache>, batcher: Arc<MulticallBatcher>, store: Arc<dyn PositionStore>) -> Self {
        Self { cache, batcher, store }
    }

    async fn read_accounts(&self, users: &[Address]) -> SyncResult<Vec<ChainResult<AccountData>>> {
        let pool = self.cache.network().pool;
        let configurations = self
            .batcher
            .read::<IPool::getUserConfigurationCall>(
                pool,
                users
                    .iter()
                    .map(|&user| IPool::getUserConfigurationCall { user })
                    .collect::<Vec<_>>(),
            )
            .await?;
        let accounts = self
            .batcher
            .read::<IPool::getUserAccountDataCall>(
                pool,
                users
                    .iter()
                    .map(|&user| IPool::getUserAccountDataCall { user })
                    .collect::<Vec<_>>(),
            )
            .await?;

        Ok(configurations
            .into_iter()
            .zip(accounts)
            .map(|(configuration, account)| -> ChainResult<AccountData> {
                let configuration = UserConfiguration(configuration?.data);
                let account = account?;
                let base = |value: U256| to_decimal(value, PRICE_DECIMALS).unwrap_or(Decimal::MAX);
                // uint256 max stands for "no debt"
                let health_factor = if account.totalDebtBase.is_zero() || account.healthFactor == U256::MAX {
                    Decimal::ZERO
                } else {
                    to_decimal(account.healthFactor, HEALTH_FACTOR_DECIMALS).unwrap_or(Decimal::MAX)
                };
                Ok(AccountData {
                    configuration,
                    collateral_base: base(account.totalCollateralBase),
                    debt_base: base(account.totalDebtBase),
                    liquidation_threshold: Decimal::from(account.currentLiquidationThreshold.saturating_to::<u64>()),
                    health_factor,
                })
            })
            .collect())
    }

    /// Load `users` from the chain into the cache and the store.
    #[instrument(skip(self, users), fields(network = %self.cache.network().name, users = users.len()))]
    pub async fn sync_users(&self, users: &[Address]) -> SyncResult<BaselineReport> {
        let mut report = BaselineReport::default();
        if users.is_empty() {
            return Ok(report);
        }
        let accounts = self.read_accounts(users).await?;

        let mut pairs = Vec::new();
        let mut loaded: Vec<(Address, AccountData)> = Vec::new();
        for (&user, account) in users.iter().zip(accounts) {
            match account {
                Ok(account) => {
                    for index in account.configuration.active_indices() {
                        match self.cache.reserve_at(index) {
                            Some(reserve) => pairs.push((user, reserve.address)),
                            None => warn!(%user, index, "Configuration flags an unknown reserve index"),
                        }
                    }
                    loaded.push((user, account));
                }
                Err(err) => {
                    warn!(%user, error = %err, "Account read failed, user stays unsynced");
                    report.failed.push(user);
                }
            }
        }

        let calls: Vec<IPoolDataProvider::getUserReserveDataCall> = pairs
            .iter()
            .map(|&(user, asset)| IPoolDataProvider::getUserReserveDataCall { asset, user })
            .collect();
        let reads = if calls.is_empty() {
            Vec::new()
        } else {
            self.batcher
                .read::<IPoolDataProvider::getUserReserveDataCall>(self.cache.network().data_provider, calls)
                .await?
        };

        let mut positions: HashMap<Address, ChainResult<Vec<UserReserve>>> = HashMap::new();
        for (&(user, reserve), read) in pairs.iter().zip(reads) {
            let entry = positions.entry(user).or_insert_with(|| Ok(Vec::new()));
            match read {
                Ok(data) => {
                    if let Ok(list) = entry {
                        list.push(onchain_position(user, reserve, &data));
                    }
                }
                Err(err) => {
                    if entry.is_ok() {
                        *entry = Err(err);
                    }
                }
            }
        }

        let mut upserts = Vec::new();
        let network = self.cache.network().name.clone();
        for (user, account) in loaded {
            let user_positions = match positions.remove(&user).unwrap_or_else(|| Ok(Vec::new())) {
                Ok(list) => list,
                Err(err) => {
                    warn!(%user, error = %err, "Position read failed, user stays unsynced");
                    report.failed.push(user);
                    continue;
                }
            };

            let record = self.apply(user, &account, &user_positions);
            upserts.push(Upsert {
                key: RecordKey::user(&network, user),
                record: to_record(&record)?,
                update_fields: USER_UPDATE_FIELDS.to_vec(),
            });
            for position in &user_positions {
                upserts.push(Upsert {
                    key: RecordKey::user_reserve(&network, user, position.reserve),
                    record: to_record(position)?,
                    update_fields: POSITION_UPDATE_FIELDS.to_vec(),
                });
            }
            debug!(
                %user,
                positions = user_positions.len(),
                health_factor = %record.health_factor,
                "User baseline loaded"
            );
            report.positions += user_positions.len();
            report.synced.push(user);
        }

        if !upserts.is_empty() {
            report.stored = self.store.bulk_upsert(upserts).await?;
        }
        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            positions = report.positions,
            "Baseline sync complete"
        );
        Ok(report)
    }

    /// Baseline every placeholder in the cache.
    pub async fn sync_unsynced(&self) -> SyncResult<BaselineReport> {
        let users = self.cache.unsynced_users();
        self.sync_users(&users).await
    }

    fn apply(&self, user: Address, account: &AccountData, positions: &[UserReserve]) -> UserAddress {
        self.cache.track_user(user, None);

        let held: Vec<Address> = positions.iter().map(|p| p.reserve).collect();
        for stale in self.cache.user_reserves(user) {
            if !held.contains(&stale.reserve) {
                self.cache.remove_user_reserve(user, stale.reserve);
            }
        }
        for position in positions {
            let status = self
                .cache
                .user_reserve(user, position.reserve)
                .map_or(SyncStatus::BASELINE, |cached| cached.status.max(SyncStatus::BASELINE));
            self.cache.upsert_user_reserve(UserReserve {
                status,
                ..position.clone()
            });
        }

        let fallback = UserAddress::placeholder(user, None);
        self.cache
            .update_user(user, |record| {
                record.configuration = account.configuration;
                record.total_collateral_base = account.collateral_base;
                record.total_debt_base = account.debt_base;
                record.current_liquidation_threshold = account.liquidation_threshold;
                record.health_factor = account.health_factor;
                record.status = record.status.max(SyncStatus::BASELINE);
                record.updated_at = Utc::now();
                record.clone()
            })
            .unwrap_or(fallback)
    }
}
