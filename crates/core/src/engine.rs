//! Off-chain health evaluation and liquidation decisions.
//!
//! Health factors are recomputed from the cache, liquidatable users are
//! confirmed against `getUserAccountData`, and every collateral/debt pair of a
//! confirmed user is priced. Only the most profitable pair is acted on:
//! submitted through the executor when execution is enabled, otherwise
//! reported to the operator.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use chrono::Utc;
use rust_decimal::Decimal;
use sentinel_chain::contracts::ILiquidationExecutor;
use sentinel_chain::{ChainClient, GasStrategy, SubmissionOutcome, TransactionExecutor, TxIntent};
use tracing::{debug, error, info, instrument, warn};

use crate::auditor::ConsistencyAuditor;
use crate::cache::ChainStateCache;
use crate::config::{GasTier, LiquidationConfig, RuntimeVariables};
use crate::decimal::{health_factor, to_decimal, units_for_usd, usd_value};
use crate::error::SyncResult;
use crate::model::{Reserve, UserAddress, UserReserve};
use crate::ports::Notifier;

/// Above this health factor only half the debt may be repaid in one call.
fn close_factor_threshold() -> Decimal {
    Decimal::new(95, 2)
}

/// Cached valuation of one user, in base currency (USD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Valuation {
    pub collateral_base: Decimal,
    pub debt_base: Decimal,
    /// Collateral-weighted liquidation threshold, basis points.
    pub liquidation_threshold: Decimal,
}

impl Valuation {
    pub fn health_factor(&self) -> Decimal {
        health_factor(self.collateral_base, self.debt_base, self.liquidation_threshold)
    }
}

/// Gas price and native token price used to cost a liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    pub gas_price_wei: u128,
    pub native_price_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationReward {
    pub debt_to_cover: U256,
    pub collateral_to_receive: U256,
    pub gross_profit_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub net_profit_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationOpportunity {
    pub user: Address,
    pub collateral_reserve: Address,
    pub debt_reserve: Address,
    pub health_factor: Decimal,
    pub reward: LiquidationReward,
}

/// What was done with a selected opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiquidationAction {
    Submitted(SubmissionOutcome),
    SubmissionFailed(String),
    Notified,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub evaluated: usize,
    /// Users dropped from tracking because they are safely healthy.
    pub removed: Vec<Address>,
    /// Users confirmed liquidatable on chain.
    pub liquidatable: Vec<Address>,
    pub actions: Vec<(LiquidationOpportunity, LiquidationAction)>,
}

/// Highest gas multiplier whose gross profit threshold is exceeded, 1 if none.
fn gas_multiplier(tiers: &[GasTier], gross_profit: Decimal) -> Decimal {
    tiers
        .iter()
        .filter(|tier| gross_profit > tier.min_gross_profit_usd)
        .max_by_key(|tier| tier.min_gross_profit_usd)
        .map_or(Decimal::ONE, |tier| tier.multiplier)
}

/// Pick the pair with the highest net profit, if any nets more than `min_net_profit`
/// and strictly more than zero.
pub fn select_most_profitable(
    candidates: Vec<LiquidationOpportunity>,
    min_net_profit: Decimal,
) -> Option<LiquidationOpportunity> {
    let floor = min_net_profit.max(Decimal::ZERO);
    candidates
        .into_iter()
        .filter(|c| c.reward.net_profit_usd > floor)
        .max_by_key(|c| c.reward.net_profit_usd)
}

pub struct LiquidationEngine {
    cache: Arc<ChainStateCache>,
    auditor: Arc<ConsistencyAuditor>,
    client: Arc<dyn ChainClient>,
    gas: Box<dyn GasStrategy>,
    executor: Option<Arc<TransactionExecutor>>,
    notifier: Arc<dyn Notifier>,
    runtime: Arc<RuntimeVariables>,
    config: LiquidationConfig,
}

impl LiquidationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<ChainStateCache>,
        auditor: Arc<ConsistencyAuditor>,
        client: Arc<dyn ChainClient>,
        gas: Box<dyn GasStrategy>,
        executor: Option<Arc<TransactionExecutor>>,
        notifier: Arc<dyn Notifier>,
        runtime: Arc<RuntimeVariables>,
        config: LiquidationConfig,
    ) -> Self {
        Self {
            cache,
            auditor,
            client,
            gas,
            executor,
            notifier,
            runtime,
            config,
        }
    }

    /// Value every cached position of `user`. Collateral counts only reserves
    /// enabled as collateral; debt counts stable and variable debt always.
    pub fn valuation(&self, user: Address) -> Valuation {
        let mut collateral_base = Decimal::ZERO;
        let mut debt_base = Decimal::ZERO;
        let mut weighted_threshold = Decimal::ZERO;

        for position in self.cache.user_reserves(user) {
            let Some(reserve) = self.cache.reserve(position.reserve) else {
                continue;
            };
            if position.usage_as_collateral_enabled {
                let value = usd_value(position.current_a_token_balance, reserve.decimals, reserve.price_usd);
                collateral_base = collateral_base.saturating_add(value);
                weighted_threshold = weighted_threshold
                    .saturating_add(value.saturating_mul(Decimal::from(reserve.liquidation_threshold)));
            }
            debt_base = debt_base.saturating_add(usd_value(
                position.total_debt(),
                reserve.decimals,
                reserve.price_usd,
            ));
        }

        let liquidation_threshold = if collateral_base.is_zero() {
            Decimal::ZERO
        } else {
            weighted_threshold.checked_div(collateral_base).unwrap_or(Decimal::ZERO)
        };
        Valuation {
            collateral_base,
            debt_base,
            liquidation_threshold,
        }
    }

    pub fn total_collateral_base_for_address(&self, user: Address) -> Decimal {
        self.valuation(user).collateral_base
    }

    pub fn total_debt_base_for_address(&self, user: Address) -> Decimal {
        self.valuation(user).debt_base
    }

    /// Recompute and store the aggregates of a tracked user.
    pub fn recompute_user(&self, user: Address) -> Option<UserAddress> {
        let valuation = self.valuation(user);
        let health_factor = valuation.health_factor();
        self.cache.update_user(user, |record| {
            record.total_collateral_base = valuation.collateral_base;
            record.total_debt_base = valuation.debt_base;
            record.current_liquidation_threshold = valuation.liquidation_threshold;
            record.health_factor = health_factor;
            record.updated_at = Utc::now();
            record.clone()
        })
    }

    /// Current gas price and native token price.
    pub async fn gas_quote(&self) -> SyncResult<GasQuote> {
        let params = self.gas.fetch_params(self.client.as_ref()).await?;
        let network = self.cache.network();
        let native_price_usd = match self.cache.reserve(network.wrapped_native) {
            Some(reserve) => reserve.price_usd,
            None => {
                warn!(wrapped_native = %network.wrapped_native, "Native token is not a reserve, gas priced at zero");
                Decimal::ZERO
            }
        };
        Ok(GasQuote {
            gas_price_wei: params.effective_gas_price(),
            native_price_usd,
        })
    }

    /// Price liquidating `debt_position` against `collateral_position`.
    pub fn calculate_net_liquidation_reward(
        &self,
        collateral: &Reserve,
        debt: &Reserve,
        collateral_position: &UserReserve,
        debt_position: &UserReserve,
        health_factor: Decimal,
        gas: &GasQuote,
    ) -> LiquidationReward {
        let total_debt = debt_position.total_debt();
        let mut debt_to_cover = if health_factor > close_factor_threshold() {
            total_debt / U256::from(2u8)
        } else {
            total_debt
        };
        let mut debt_usd = usd_value(debt_to_cover, debt.decimals, debt.price_usd);

        let base_collateral = units_for_usd(debt_usd, collateral.decimals, collateral.price_usd);
        let with_bonus = base_collateral.saturating_mul(U256::from(collateral.liquidation_bonus)) / U256::from(10_000u32);
        let bonus = with_bonus.saturating_sub(base_collateral);
        let protocol_fee = bonus.saturating_mul(U256::from(collateral.liquidation_protocol_fee)) / U256::from(10_000u32);
        let mut collateral_to_receive = with_bonus.saturating_sub(protocol_fee);

        let available = collateral_position.current_a_token_balance;
        if collateral_to_receive > available && !collateral_to_receive.is_zero() {
            debt_to_cover = debt_to_cover.saturating_mul(available) / collateral_to_receive;
            debt_usd = usd_value(debt_to_cover, debt.decimals, debt.price_usd);
            collateral_to_receive = available;
        }

        let collateral_usd = usd_value(collateral_to_receive, collateral.decimals, collateral.price_usd);
        let gross_profit_usd = collateral_usd.saturating_sub(debt_usd);

        let gas_wei = U256::from(self.runtime.average_gas_units()).saturating_mul(U256::from(gas.gas_price_wei));
        let base_gas_usd = to_decimal(gas_wei, 18)
            .unwrap_or(Decimal::MAX)
            .saturating_mul(gas.native_price_usd);
        let gas_cost_usd = base_gas_usd.saturating_mul(gas_multiplier(&self.config.gas_tiers, gross_profit_usd));

        LiquidationReward {
            debt_to_cover,
            collateral_to_receive,
            gross_profit_usd,
            gas_cost_usd,
            net_profit_usd: gross_profit_usd.saturating_sub(gas_cost_usd),
        }
    }

    /// Every eligible collateral/debt pair of `user`, priced.
    pub fn liquidation_candidates(&self, user: Address, health_factor: Decimal, gas: &GasQuote) -> Vec<LiquidationOpportunity> {
        let positions = self.cache.user_reserves(user);
        let priced = |position: &UserReserve| -> Option<Reserve> {
            self.cache.reserve(position.reserve).filter(|r| !r.price_usd.is_zero())
        };

        let collaterals: Vec<(&UserReserve, Reserve)> = positions
            .iter()
            .filter(|p| p.is_collateral())
            .filter_map(|p| priced(p).map(|r| (p, r)))
            .collect();
        let debts: Vec<(&UserReserve, Reserve)> = positions
            .iter()
            .filter(|p| p.has_debt())
            .filter_map(|p| priced(p).map(|r| (p, r)))
            .collect();

        let mut candidates = Vec::with_capacity(collaterals.len() * debts.len());
        for (collateral_position, collateral) in &collaterals {
            for (debt_position, debt) in &debts {
                let reward = self.calculate_net_liquidation_reward(
                    collateral,
                    debt,
                    collateral_position,
                    debt_position,
                    health_factor,
                    gas,
                );
                debug!(
                    %user,
                    collateral = %collateral.symbol,
                    debt = %debt.symbol,
                    gross = %reward.gross_profit_usd,
                    gas = %reward.gas_cost_usd,
                    net = %reward.net_profit_usd,
                    "Pair priced"
                );
                candidates.push(LiquidationOpportunity {
                    user,
                    collateral_reserve: collateral.address,
                    debt_reserve: debt.address,
                    health_factor,
                    reward,
                });
            }
        }
        candidates
    }

    /// Evaluate `addresses`, or every tracked user. Unsynced users are skipped.
    #[instrument(skip(self, addresses), fields(network = %self.cache.network().name))]
    pub async fn check_liquidate_addresses(&self, addresses: Option<&[Address]>) -> SyncResult<EvaluationReport> {
        let users = match addresses {
            Some(addresses) => addresses.to_vec(),
            None => self.cache.tracked_users(),
        };
        let healthy = self.runtime.healthy_health_factor();
        let mut report = EvaluationReport::default();
        let mut at_risk = Vec::new();

        for user in users {
            let synced = self.cache.user(user).is_some_and(|u| u.status.is_synced());
            if !synced {
                continue;
            }
            let Some(record) = self.recompute_user(user) else {
                continue;
            };
            report.evaluated += 1;

            if record.has_debt() && record.health_factor < Decimal::ONE {
                info!(%user, health_factor = %record.health_factor, debt = %record.total_debt_base, "Position below liquidation threshold");
                at_risk.push(user);
            } else if record.has_debt() && record.health_factor > healthy {
                self.cache.remove_user(user);
                debug!(%user, health_factor = %record.health_factor, "Healthy user dropped from tracking");
                report.removed.push(user);
            }
        }

        if at_risk.is_empty() {
            return Ok(report);
        }
        let gas = self.gas_quote().await?;

        for user in at_risk {
            let check = match self.auditor.check_account_data_before_liquidation(user).await {
                Ok(check) => check,
                Err(err) => {
                    warn!(%user, error = %err, "Account check failed, skipping");
                    continue;
                }
            };
            if !check.is_liquidatable() {
                info!(%user, health_factor = %check.health_factor, "Chain reports position healthy, skipping");
                continue;
            }
            report.liquidatable.push(user);

            let candidates = self.liquidation_candidates(user, check.health_factor, &gas);
            let Some(best) = select_most_profitable(candidates, self.runtime.min_net_profit_usd()) else {
                info!(%user, "No profitable liquidation pair");
                continue;
            };
            let action = self.act(&best).await;
            report.actions.push((best, action));
        }
        Ok(report)
    }

    async fn act(&self, opportunity: &LiquidationOpportunity) -> LiquidationAction {
        let network = self.cache.network();
        let symbol = |address: Address| {
            self.cache
                .reserve(address)
                .map_or_else(|| address.to_string(), |r| r.symbol)
        };
        let collateral = symbol(opportunity.collateral_reserve);
        let debt = symbol(opportunity.debt_reserve);

        if self.runtime.execution_enabled() {
            match (&self.executor, network.liquidation_executor) {
                (Some(executor), Some(contract)) => {
                    let data = ILiquidationExecutor::liquidateCall {
                        collateralAsset: opportunity.collateral_reserve,
                        debtAsset: opportunity.debt_reserve,
                        user: opportunity.user,
                        debtToCover: opportunity.reward.debt_to_cover,
                        receiveAToken: self.config.receive_a_token,
                    }
                    .abi_encode();
                    let intent = TxIntent::new(contract, data.into()).with_gas_limit(self.config.gas_limit);
                    return match executor.submit(intent).await {
                        Ok(outcome) => {
                            info!(
                                user = %opportunity.user,
                                %collateral,
                                %debt,
                                net = %opportunity.reward.net_profit_usd,
                                ?outcome,
                                "Liquidation submitted"
                            );
                            LiquidationAction::Submitted(outcome)
                        }
                        Err(err) => {
                            error!(user = %opportunity.user, error = %err, "Liquidation submission failed");
                            LiquidationAction::SubmissionFailed(err.to_string())
                        }
                    };
                }
                _ => warn!(network = %network.name, "Execution enabled without executor, reporting only"),
            }
        }

        let body = format!(
            "{} on {}: health factor {}, repay {} {} against {} collateral, net profit ${}",
            opportunity.user,
            network.name,
            opportunity.health_factor.round_dp(4),
            opportunity.reward.debt_to_cover,
            debt,
            collateral,
            opportunity.reward.net_profit_usd.round_dp(2),
        );
        if let Err(err) = self.notifier.send_alert("Liquidation opportunity", &body).await {
            warn!(error = %err, "Alert delivery failed");
        }
        LiquidationAction::Notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fixtures::{self, dec};
    use crate::config::RuntimeVariable;
    use crate::model::SyncStatus;
    use crate::ports::recording::RecordingNotifier;
    use crate::test_support::{FakeAccount, FakeProtocol};
    use alloy::primitives::{Bytes, B256};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sentinel_api::{RelayError, TransactionRelay};
    use sentinel_chain::gas::LegacyGasStrategy;
    use sentinel_chain::testing::FakeChain;
    use sentinel_chain::{LocalKeySigner, NonceManager};

    const WETH: Address = Address::repeat_byte(0x10);
    const USDC: Address = Address::repeat_byte(0x20);
    const ALICE: Address = Address::repeat_byte(0x77);
    const BOB: Address = Address::repeat_byte(0x78);
    const CAROL: Address = Address::repeat_byte(0x79);
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn eth(units: u64) -> U256 {
        U256::from(units) * U256::from(10u64).pow(U256::from(15u8))
    }

    fn usdc(units: u64) -> U256 {
        U256::from(units) * U256::from(1_000_000u64)
    }

    #[derive(Default)]
    struct RecordingRelay {
        submitted: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl TransactionRelay for RecordingRelay {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn submit(&self, raw: &Bytes, _current_block: u64) -> Result<B256, RelayError> {
            self.submitted.lock().push(raw.clone());
            Ok(B256::with_last_byte(1))
        }
    }

    struct Harness {
        protocol: Arc<FakeProtocol>,
        chain: Arc<FakeChain>,
        cache: Arc<ChainStateCache>,
        notifier: Arc<RecordingNotifier>,
        runtime: Arc<RuntimeVariables>,
        relay: Arc<RecordingRelay>,
        engine: LiquidationEngine,
    }

    fn harness(with_executor: bool) -> Harness {
        let protocol = FakeProtocol::new();
        let (chain, batcher) = protocol.batcher();
        let cache = fixtures::cache();
        let notifier = Arc::new(RecordingNotifier::default());
        let runtime = Arc::new(RuntimeVariables::default());
        let relay = Arc::new(RecordingRelay::default());
        let executor = with_executor.then(|| {
            Arc::new(TransactionExecutor::new(
                chain.clone(),
                Arc::new(LocalKeySigner::from_private_key(DEV_KEY).unwrap()),
                Arc::new(NonceManager::new()),
                Box::new(LegacyGasStrategy::new(1_000_000_000, 10_000_000_000)),
                relay.clone(),
            ))
        });
        let engine = LiquidationEngine::new(
            cache.clone(),
            Arc::new(ConsistencyAuditor::new(cache.clone(), batcher)),
            chain.clone(),
            Box::new(LegacyGasStrategy::new(1_000_000_000, 10_000_000_000)),
            executor,
            notifier.clone(),
            runtime.clone(),
            LiquidationConfig::default(),
        );
        Harness {
            protocol,
            chain,
            cache,
            notifier,
            runtime,
            relay,
            engine,
        }
    }

    /// Baseline user with WETH collateral and USDC debt.
    fn position(cache: &ChainStateCache, user: Address, weth_milli: u64, usdc_debt: u64) {
        cache.track_user(user, None);
        cache.update_user(user, |u| u.status = SyncStatus::BASELINE);

        let mut collateral = UserReserve::empty(user, WETH, SyncStatus::BASELINE);
        collateral.current_a_token_balance = eth(weth_milli);
        collateral.usage_as_collateral_enabled = true;
        cache.upsert_user_reserve(collateral);

        if usdc_debt > 0 {
            let mut debt = UserReserve::empty(user, USDC, SyncStatus::BASELINE);
            debt.current_variable_debt = usdc(usdc_debt);
            cache.upsert_user_reserve(debt);
        }
    }

    fn quote() -> GasQuote {
        GasQuote {
            gas_price_wei: 1_000_000_000,
            native_price_usd: dec("2000"),
        }
    }

    fn reward_for(h: &Harness, user: Address, hf: &str) -> LiquidationReward {
        let reserves = fixtures::reserves();
        h.engine.calculate_net_liquidation_reward(
            &reserves[0],
            &reserves[1],
            &h.cache.user_reserve(user, WETH).unwrap(),
            &h.cache.user_reserve(user, USDC).unwrap(),
            dec(hf),
            &quote(),
        )
    }

    #[test]
    fn test_valuation_and_health_factor() {
        let h = harness(false);
        position(&h.cache, ALICE, 1_000, 1_800);

        let valuation = h.engine.valuation(ALICE);
        assert_eq!(valuation.collateral_base, dec("2000"));
        assert_eq!(valuation.debt_base, dec("1800"));
        assert_eq!(valuation.liquidation_threshold, dec("8250"));
        assert_eq!(valuation.health_factor(), dec("2000") * dec("0.825") / dec("1800"));

        let record = h.engine.recompute_user(ALICE).unwrap();
        assert_eq!(record.health_factor, valuation.health_factor());
        assert!(record.health_factor < Decimal::ONE);
    }

    #[test]
    fn test_collateral_excludes_disabled_reserves() {
        let h = harness(false);
        position(&h.cache, ALICE, 1_000, 1_800);
        h.cache.update_user_reserve(ALICE, WETH, |p| p.usage_as_collateral_enabled = false);

        assert_eq!(h.engine.total_collateral_base_for_address(ALICE), Decimal::ZERO);
        assert_eq!(h.engine.total_debt_base_for_address(ALICE), dec("1800"));
    }

    #[test]
    fn test_reward_full_close() {
        let h = harness(false);
        position(&h.cache, ALICE, 1_000, 1_800);

        let reward = reward_for(&h, ALICE, "0.9");
        assert_eq!(reward.debt_to_cover, usdc(1_800));
        // 0.9 WETH plus 5% bonus, less 10% of the bonus
        assert_eq!(reward.collateral_to_receive, eth(940) + U256::from(5u64) * U256::from(10u64).pow(U256::from(14u8)));
        assert_eq!(reward.gross_profit_usd, dec("81"));
        // 900k gas at 1 gwei, ETH at $2000, doubled past the $50 tier
        assert_eq!(reward.gas_cost_usd, dec("3.6"));
        assert_eq!(reward.net_profit_usd, dec("77.4"));
    }

    #[test]
    fn test_reward_half_close_above_threshold() {
        let h = harness(false);
        position(&h.cache, ALICE, 1_000, 1_800);

        let reward = reward_for(&h, ALICE, "0.97");
        assert_eq!(reward.debt_to_cover, usdc(900));
        assert_eq!(reward.gross_profit_usd, dec("40.5"));
    }

    #[test]
    fn test_reward_capped_by_collateral() {
        let h = harness(false);
        position(&h.cache, ALICE, 500, 1_800);

        let reward = reward_for(&h, ALICE, "0.5");
        assert_eq!(reward.collateral_to_receive, eth(500));
        assert!(reward.debt_to_cover < usdc(1_800));
        assert!(reward.gross_profit_usd > Decimal::ZERO);
    }

    #[test]
    fn test_gas_multiplier_tiers() {
        let tiers = LiquidationConfig::default().gas_tiers;
        assert_eq!(gas_multiplier(&tiers, dec("10")), Decimal::ONE);
        assert_eq!(gas_multiplier(&tiers, dec("50.01")), dec("2"));
        assert_eq!(gas_multiplier(&tiers, dec("600")), dec("4"));
        assert_eq!(gas_multiplier(&tiers, dec("1000000")), dec("8"));
    }

    #[test]
    fn test_gas_multiplier_threshold_is_exclusive() {
        let tiers = LiquidationConfig::default().gas_tiers;
        assert_eq!(gas_multiplier(&tiers, dec("50")), Decimal::ONE);
        assert_eq!(gas_multiplier(&tiers, dec("500")), dec("2"));
        assert_eq!(gas_multiplier(&tiers, dec("5000")), dec("4"));
    }

    fn opportunity(collateral: Address, net: &str) -> LiquidationOpportunity {
        LiquidationOpportunity {
            user: ALICE,
            collateral_reserve: collateral,
            debt_reserve: USDC,
            health_factor: dec("0.9"),
            reward: LiquidationReward {
                debt_to_cover: U256::from(1u8),
                collateral_to_receive: U256::from(1u8),
                gross_profit_usd: dec(net),
                gas_cost_usd: Decimal::ZERO,
                net_profit_usd: dec(net),
            },
        }
    }

    #[test]
    fn test_selects_most_profitable_pair() {
        let best = select_most_profitable(
            vec![opportunity(USDC, "45"), opportunity(WETH, "120")],
            Decimal::ZERO,
        )
        .unwrap();
        assert_eq!(best.collateral_reserve, WETH);
        assert_eq!(best.reward.net_profit_usd, dec("120"));
    }

    #[test]
    fn test_unprofitable_pairs_rejected() {
        assert!(select_most_profitable(vec![opportunity(WETH, "0"), opportunity(USDC, "-3")], Decimal::ZERO).is_none());
        assert!(select_most_profitable(vec![opportunity(WETH, "45")], dec("50")).is_none());
    }

    fn liquidatable_account(h: &Harness, user: Address) {
        h.protocol.set_account(
            user,
            FakeAccount {
                collateral_base: U256::from(2_000_00000000u64),
                debt_base: U256::from(1_800_00000000u64),
                liquidation_threshold: U256::from(8250u32),
                health_factor: U256::from(916_666_666_666_666_666u64),
            },
        );
    }

    #[tokio::test]
    async fn test_opportunity_reported_when_execution_disabled() {
        let h = harness(false);
        position(&h.cache, ALICE, 1_000, 1_800);
        liquidatable_account(&h, ALICE);

        let report = h.engine.check_liquidate_addresses(None).await.unwrap();

        assert_eq!(report.liquidatable, vec![ALICE]);
        assert_eq!(report.actions.len(), 1);
        let (best, action) = &report.actions[0];
        assert_eq!(best.collateral_reserve, WETH);
        assert_eq!(best.debt_reserve, USDC);
        assert_eq!(*action, LiquidationAction::Notified);
        assert_eq!(h.notifier.alerts.lock()[0].0, "Liquidation opportunity");
    }

    #[tokio::test]
    async fn test_chain_veto_skips_liquidation() {
        let h = harness(false);
        position(&h.cache, ALICE, 1_000, 1_800);
        h.protocol.set_account(
            ALICE,
            FakeAccount {
                collateral_base: U256::from(2_000_00000000u64),
                debt_base: U256::from(1_000_00000000u64),
                liquidation_threshold: U256::from(8250u32),
                health_factor: U256::from(1_650_000_000_000_000_000u64),
            },
        );

        let report = h.engine.check_liquidate_addresses(Some(&[ALICE])).await.unwrap();
        assert!(report.liquidatable.is_empty());
        assert!(h.notifier.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_healthy_users_dropped_zero_debt_kept() {
        let h = harness(false);
        position(&h.cache, BOB, 1_000, 100);
        position(&h.cache, CAROL, 1_000, 0);

        let report = h.engine.check_liquidate_addresses(None).await.unwrap();

        assert_eq!(report.evaluated, 2);
        assert_eq!(report.removed, vec![BOB]);
        assert!(!h.cache.is_tracked(BOB));
        assert!(h.cache.is_tracked(CAROL));
        assert_eq!(h.cache.user(CAROL).unwrap().health_factor, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unsynced_users_not_evaluated() {
        let h = harness(false);
        h.cache.track_user(ALICE, Some(5));

        let report = h.engine.check_liquidate_addresses(None).await.unwrap();
        assert_eq!(report.evaluated, 0);
        assert!(h.cache.is_tracked(ALICE));
    }

    #[tokio::test]
    async fn test_execution_submits_through_executor() {
        let h = harness(true);
        h.runtime.set(RuntimeVariable::ExecutionEnabled, "true").unwrap();
        position(&h.cache, ALICE, 1_000, 1_800);
        liquidatable_account(&h, ALICE);

        let report = h.engine.check_liquidate_addresses(None).await.unwrap();

        let (_, action) = &report.actions[0];
        assert!(matches!(action, LiquidationAction::Submitted(outcome) if outcome.is_broadcast()));
        assert_eq!(h.relay.submitted.lock().len(), 1);
        assert!(h.notifier.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reverted_dry_run_is_not_broadcast() {
        let h = harness(true);
        h.runtime.set(RuntimeVariable::ExecutionEnabled, "true").unwrap();
        h.chain.fail_simulations(Some("execution reverted"));
        position(&h.cache, ALICE, 1_000, 1_800);
        liquidatable_account(&h, ALICE);

        let report = h.engine.check_liquidate_addresses(Some(&[ALICE])).await.unwrap();

        let (_, action) = &report.actions[0];
        assert!(matches!(
            action,
            LiquidationAction::Submitted(SubmissionOutcome::SimulationFailed { .. })
        ));
        assert!(h.relay.submitted.lock().is_empty());
    }
}
