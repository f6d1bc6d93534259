//! Cache versus chain consistency checks.
//!
//! Audits read authoritative values and report drift; they never write to
//! the cache. Overwriting cached state is the separate, explicit
//! [`ConsistencyAuditor::reconcile_user_reserve`] step.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use sentinel_chain::contracts::{IPool, IPoolDataProvider};
use sentinel_chain::{ChainResult, EventKind, MulticallBatcher};
use smallvec::SmallVec;
use tracing::{debug, info, instrument, warn};

use crate::cache::ChainStateCache;
use crate::decimal::{to_decimal, HEALTH_FACTOR_DECIMALS, PRICE_DECIMALS};
use crate::error::{SyncError, SyncResult};
use crate::model::{SyncStatus, UserReserve, UserReserveProperty};

/// Value shown for a position the cache does not hold.
const ABSENT: &str = "absent";

/// A scheduled check of selected properties of one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRequest {
    /// Event that triggered the check, if any.
    pub event: Option<EventKind>,
    pub user: Address,
    pub reserve: Address,
    pub properties: SmallVec<[UserReserveProperty; 2]>,
    pub block: Option<u64>,
}

impl AuditRequest {
    /// Every property of the position.
    pub fn full(user: Address, reserve: Address) -> Self {
        Self {
            event: None,
            user,
            reserve,
            properties: UserReserveProperty::ALL.into_iter().collect(),
            block: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub property: &'static str,
    pub cached: String,
    pub onchain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub user: Address,
    pub reserve: Address,
    pub event: Option<EventKind>,
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Result of the last-chance account check before a liquidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCheck {
    pub user: Address,
    pub collateral_base: Decimal,
    pub debt_base: Decimal,
    pub health_factor: Decimal,
    pub mismatches: Vec<Mismatch>,
}

impl AccountCheck {
    /// On-chain state allows liquidation: debt outstanding and HF below 1.
    pub fn is_liquidatable(&self) -> bool {
        !self.debt_base.is_zero() && self.health_factor < Decimal::ONE
    }
}

/// Position as reported by the data provider.
pub(crate) fn onchain_position(
    user: Address,
    reserve: Address,
    data: &IPoolDataProvider::getUserReserveDataReturn,
) -> UserReserve {
    UserReserve {
        user,
        reserve,
        current_a_token_balance: data.currentATokenBalance,
        current_stable_debt: data.currentStableDebt,
        current_variable_debt: data.currentVariableDebt,
        usage_as_collateral_enabled: data.usageAsCollateralEnabled,
        status: SyncStatus::BASELINE,
    }
}

fn compare(
    cached: Option<&UserReserve>,
    onchain: &UserReserve,
    properties: &[UserReserveProperty],
) -> Vec<Mismatch> {
    properties
        .iter()
        .filter_map(|&property| {
            let cached_value = cached.map_or_else(|| ABSENT.to_string(), |c| c.property(property));
            let onchain_value = onchain.property(property);
            (cached_value != onchain_value).then(|| Mismatch {
                property: property.name(),
                cached: cached_value,
                onchain: onchain_value,
            })
        })
        .collect()
}

/// Base-currency amount (8 decimals) as a string with cents precision.
fn base_amount(value: Decimal) -> String {
    value.round_dp(2).normalize().to_string()
}

pub struct ConsistencyAuditor {
    cache: Arc<ChainStateCache>,
    batcher: Arc<MulticallBatcher>,
}

impl ConsistencyAuditor {
    pub fn new(cache: Arc<ChainStateCache>, batcher: Arc<MulticallBatcher>) -> Self {
        Self { cache, batcher }
    }

    async fn read_positions(&self, pairs: &[(Address, Address)]) -> SyncResult<Vec<ChainResult<UserReserve>>> {
        let calls: Vec<IPoolDataProvider::getUserReserveDataCall> = pairs
            .iter()
            .map(|&(user, reserve)| IPoolDataProvider::getUserReserveDataCall { asset: reserve, user })
            .collect();
        let results = self
            .batcher
            .read::<IPoolDataProvider::getUserReserveDataCall>(self.cache.network().data_provider, calls)
            .await?;
        Ok(pairs
            .iter()
            .zip(results)
            .map(|(&(user, reserve), result)| result.map(|data| onchain_position(user, reserve, &data)))
            .collect())
    }

    /// Check one position against the chain.
    pub async fn check_consistency(&self, request: &AuditRequest) -> SyncResult<AuditReport> {
        self.check_many(std::slice::from_ref(request))
            .await?
            .pop()
            .ok_or_else(|| SyncError::Validation("empty audit result".into()))?
    }

    /// Check many positions with one batched read. Each report stands alone:
    /// a failed read fails only its own request.
    #[instrument(skip(self, requests), fields(network = %self.cache.network().name, requests = requests.len()))]
    pub async fn check_many(&self, requests: &[AuditRequest]) -> SyncResult<Vec<SyncResult<AuditReport>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let pairs: Vec<(Address, Address)> = requests.iter().map(|r| (r.user, r.reserve)).collect();
        let onchain = self.read_positions(&pairs).await?;

        Ok(requests
            .iter()
            .zip(onchain)
            .map(|(request, onchain)| -> SyncResult<AuditReport> {
                let onchain = onchain?;
                let cached = self.cache.user_reserve(request.user, request.reserve);
                let mismatches = compare(cached.as_ref(), &onchain, &request.properties);
                let event = request.event.map(EventKind::name).unwrap_or("scheduled");

                if mismatches.is_empty() {
                    debug!(user = %request.user, reserve = %request.reserve, event, "Cache consistent with chain");
                }
                for mismatch in &mismatches {
                    warn!(
                        user = %request.user,
                        reserve = %request.reserve,
                        event,
                        block = ?request.block,
                        property = mismatch.property,
                        cached = %mismatch.cached,
                        onchain = %mismatch.onchain,
                        "Consistency drift"
                    );
                }
                Ok(AuditReport {
                    user: request.user,
                    reserve: request.reserve,
                    event: request.event,
                    checked: request.properties.len(),
                    mismatches,
                })
            })
            .collect())
    }

    /// Compare cached account aggregates with `getUserAccountData` right
    /// before a liquidation. Drift is reported, the on-chain values decide.
    #[instrument(skip(self), fields(network = %self.cache.network().name))]
    pub async fn check_account_data_before_liquidation(&self, user: Address) -> SyncResult<AccountCheck> {
        let data = self
            .batcher
            .read(self.cache.network().pool, IPool::getUserAccountDataCall { user })
            .await?
            .pop()
            .ok_or_else(|| SyncError::Validation("empty account data result".into()))??;

        let collateral_base = to_decimal(data.totalCollateralBase, PRICE_DECIMALS).unwrap_or(Decimal::MAX);
        let debt_base = to_decimal(data.totalDebtBase, PRICE_DECIMALS).unwrap_or(Decimal::MAX);
        // The pool reports uint256 max for accounts without debt.
        let health_factor = if data.totalDebtBase.is_zero() || data.healthFactor == U256::MAX {
            Decimal::ZERO
        } else {
            to_decimal(data.healthFactor, HEALTH_FACTOR_DECIMALS).unwrap_or(Decimal::MAX)
        };

        let mut mismatches = Vec::new();
        if let Some(cached) = self.cache.user(user) {
            let pairs = [
                ("totalCollateralBase", base_amount(cached.total_collateral_base), base_amount(collateral_base)),
                ("totalDebtBase", base_amount(cached.total_debt_base), base_amount(debt_base)),
                (
                    "healthFactor",
                    cached.health_factor.round_dp(4).normalize().to_string(),
                    health_factor.round_dp(4).normalize().to_string(),
                ),
            ];
            for (property, cached_value, onchain_value) in pairs {
                if cached_value != onchain_value {
                    warn!(%user, property, cached = %cached_value, onchain = %onchain_value, "Account data drift");
                    mismatches.push(Mismatch {
                        property,
                        cached: cached_value,
                        onchain: onchain_value,
                    });
                }
            }
        }

        let check = AccountCheck {
            user,
            collateral_base,
            debt_base,
            health_factor,
            mismatches,
        };
        debug!(%user, health_factor = %check.health_factor, liquidatable = check.is_liquidatable(), "Account data checked");
        Ok(check)
    }

    /// Overwrite the cached position with chain values. Returns what changed.
    #[instrument(skip(self), fields(network = %self.cache.network().name))]
    pub async fn reconcile_user_reserve(&self, user: Address, reserve: Address) -> SyncResult<Vec<Mismatch>> {
        let onchain = self
            .read_positions(&[(user, reserve)])
            .await?
            .pop()
            .ok_or_else(|| SyncError::Validation("empty reconcile result".into()))??;
        let cached = self.cache.user_reserve(user, reserve);
        let corrections = compare(cached.as_ref(), &onchain, &UserReserveProperty::ALL);

        let status = cached.map_or(SyncStatus::BASELINE, |c| c.status.max(SyncStatus::BASELINE));
        let corrected = UserReserve { status, ..onchain };
        self.cache.upsert_user_reserve(corrected.clone());
        self.cache.sync_configuration_bits(&corrected);

        for correction in &corrections {
            info!(
                %user,
                %reserve,
                property = correction.property,
                from = %correction.cached,
                to = %correction.onchain,
                "Cached position corrected"
            );
        }
        Ok(corrections)
    }
}
