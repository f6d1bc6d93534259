//! Event-sourced cache updates.
//!
//! A block's logs are decoded and applied strictly in order. Every balance
//! mutation is gated on the position having a chain baseline: a delta applied
//! on top of a placeholder would fabricate a balance. Addresses seen for the
//! first time become unsynced placeholders; their store inserts are buffered
//! and written in batches.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use parking_lot::Mutex;
use sentinel_chain::{decode_log, BlockPayload, EventKind, InterestRateMode, ProtocolEvent};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use tracing::{debug, info, instrument, trace, warn};

use crate::auditor::AuditRequest;
use crate::cache::ChainStateCache;
use crate::config::RuntimeVariables;
use crate::decimal::price_from_oracle;
use crate::error::{SyncError, SyncResult};
use crate::model::{UserAddress, UserReserve, UserReserveProperty};
use crate::ports::{to_record, PositionStore, RecordKey, Upsert};

/// What to do with a log whose signature is not in the event table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownEventPolicy {
    /// Skip that log and keep applying the rest of the block.
    #[default]
    SkipLog,
    /// Stop processing the block at the first unknown log.
    AbortBlock,
}

impl fmt::Display for UnknownEventPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnknownEventPolicy::SkipLog => "skip_log",
            UnknownEventPolicy::AbortBlock => "abort_block",
        })
    }
}

impl FromStr for UnknownEventPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip_log" => Ok(Self::SkipLog),
            "abort_block" => Ok(Self::AbortBlock),
            other => Err(SyncError::Validation(format!("unknown event policy: {other}"))),
        }
    }
}

/// Summary of one processed block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    pub block: u64,
    /// Position or price updates written to the cache.
    pub mutations: usize,
    /// Deltas dropped because the position had no baseline yet.
    pub gated: usize,
    pub unknown: usize,
    pub malformed: usize,
    /// Recognized events from a contract other than the expected emitter.
    pub foreign: usize,
    pub aborted: bool,
    pub new_users: Vec<Address>,
    /// Users whose health must be re-evaluated, in first-seen order.
    pub affected_users: Vec<Address>,
    pub audits: Vec<AuditRequest>,
}

impl BlockOutcome {
    fn affect(&mut self, user: Address) {
        if !self.affected_users.contains(&user) {
            self.affected_users.push(user);
        }
    }
}

pub struct StateSynchronizer {
    cache: Arc<ChainStateCache>,
    store: Arc<dyn PositionStore>,
    runtime: Arc<RuntimeVariables>,
    pending_inserts: Mutex<Vec<UserAddress>>,
    writer: tokio::sync::Mutex<()>,
}

impl StateSynchronizer {
    pub fn new(
        cache: Arc<ChainStateCache>,
        store: Arc<dyn PositionStore>,
        runtime: Arc<RuntimeVariables>,
    ) -> Self {
        Self {
            cache,
            store,
            runtime,
            pending_inserts: Mutex::new(Vec::new()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn pending_inserts(&self) -> usize {
        self.pending_inserts.lock().len()
    }

    /// Apply a block's logs in order.
    #[instrument(skip(self, block), fields(network = %self.cache.network().name, block = block.number, logs = block.logs.len()))]
    pub async fn process_block(&self, block: &BlockPayload) -> BlockOutcome {
        let _writer = self.writer.lock().await;
        let network = self.cache.network().clone();
        let policy = self.runtime.unknown_event_policy();
        let mut outcome = BlockOutcome {
            block: block.number,
            ..BlockOutcome::default()
        };

        for log in &block.logs {
            let event = match decode_log(log) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    outcome.unknown += 1;
                    let signature = log.signature().unwrap_or_default();
                    if policy == UnknownEventPolicy::AbortBlock {
                        warn!(log_index = log.index, %signature, "Unknown event, abandoning rest of block");
                        outcome.aborted = true;
                        break;
                    }
                    trace!(log_index = log.index, %signature, "Unknown event skipped");
                    continue;
                }
                Err(err) => {
                    outcome.malformed += 1;
                    warn!(log_index = log.index, error = %err, "Undecodable log skipped");
                    continue;
                }
            };

            let is_price_feed = matches!(event, ProtocolEvent::PriceUpdated { .. });
            if !is_price_feed && log.emitter() != network.pool {
                outcome.foreign += 1;
                debug!(emitter = %log.emitter(), event = event.kind().name(), "Pool event from foreign contract ignored");
                continue;
            }

            self.apply_event(&event, block.number, &mut outcome).await;
        }

        if outcome.mutations > 0 || !outcome.new_users.is_empty() {
            info!(
                mutations = outcome.mutations,
                gated = outcome.gated,
                new_users = outcome.new_users.len(),
                affected = outcome.affected_users.len(),
                "Block applied"
            );
        }
        outcome
    }

    /// True only when `(user, reserve)` has a chain baseline.
    ///
    /// A baseline-synced user without a cached position in `reserve` holds
    /// nothing there, so an empty position is created with the user's status.
    pub fn block_should_be_applied(&self, user: Address, reserve: Address) -> bool {
        if let Some(position) = self.cache.user_reserve(user, reserve) {
            return position.status.is_synced();
        }
        match self.cache.user(user) {
            Some(tracked) if tracked.status.is_synced() => {
                self.cache.ensure_user_reserve(user, reserve, tracked.status);
                true
            }
            _ => false,
        }
    }

    async fn apply_event(&self, event: &ProtocolEvent, block: u64, outcome: &mut BlockOutcome) {
        let kind = event.kind();
        match *event {
            ProtocolEvent::Supply { reserve, user, amount } => {
                self.observe(user, block, outcome).await;
                self.adjust(kind, user, reserve, block, outcome, smallvec![UserReserveProperty::CurrentATokenBalance], |p| {
                    p.current_a_token_balance = p.current_a_token_balance.saturating_add(amount);
                });
            }
            ProtocolEvent::Withdraw { reserve, user, amount } => {
                self.observe(user, block, outcome).await;
                self.adjust(kind, user, reserve, block, outcome, smallvec![UserReserveProperty::CurrentATokenBalance], |p| {
                    p.current_a_token_balance = p.current_a_token_balance.saturating_sub(amount);
                });
            }
            ProtocolEvent::Borrow { reserve, user, amount, mode } => {
                self.observe(user, block, outcome).await;
                let property = match mode {
                    InterestRateMode::Stable => UserReserveProperty::CurrentStableDebt,
                    InterestRateMode::Variable => UserReserveProperty::CurrentVariableDebt,
                };
                self.adjust(kind, user, reserve, block, outcome, smallvec![property], |p| match mode {
                    InterestRateMode::Stable => {
                        p.current_stable_debt = p.current_stable_debt.saturating_add(amount)
                    }
                    InterestRateMode::Variable => {
                        p.current_variable_debt = p.current_variable_debt.saturating_add(amount)
                    }
                });
            }
            ProtocolEvent::Repay { reserve, user, amount, use_a_tokens } => {
                self.observe(user, block, outcome).await;
                let mut properties: SmallVec<[UserReserveProperty; 2]> = smallvec![
                    UserReserveProperty::CurrentVariableDebt,
                    UserReserveProperty::CurrentStableDebt
                ];
                if use_a_tokens {
                    properties.push(UserReserveProperty::CurrentATokenBalance);
                }
                self.adjust(kind, user, reserve, block, outcome, properties, |p| {
                    let excess = p.reduce_debt(amount);
                    if !excess.is_zero() {
                        debug!(%user, %reserve, %excess, "Repay exceeds cached debt");
                    }
                    if use_a_tokens {
                        p.current_a_token_balance = p.current_a_token_balance.saturating_sub(amount);
                    }
                });
            }
            ProtocolEvent::CollateralEnabled { reserve, user } => {
                self.observe(user, block, outcome).await;
                self.adjust(kind, user, reserve, block, outcome, smallvec![UserReserveProperty::UsageAsCollateralEnabled], |p| {
                    p.usage_as_collateral_enabled = true;
                });
            }
            ProtocolEvent::CollateralDisabled { reserve, user } => {
                self.observe(user, block, outcome).await;
                self.adjust(kind, user, reserve, block, outcome, smallvec![UserReserveProperty::UsageAsCollateralEnabled], |p| {
                    p.usage_as_collateral_enabled = false;
                });
            }
            ProtocolEvent::LiquidationCall { collateral, debt, user, debt_to_cover, liquidated_collateral, .. } => {
                self.observe(user, block, outcome).await;
                self.adjust(kind, user, collateral, block, outcome, smallvec![UserReserveProperty::CurrentATokenBalance], |p| {
                    p.current_a_token_balance = p.current_a_token_balance.saturating_sub(liquidated_collateral);
                });
                self.adjust(
                    kind,
                    user,
                    debt,
                    block,
                    outcome,
                    smallvec![UserReserveProperty::CurrentVariableDebt, UserReserveProperty::CurrentStableDebt],
                    |p| {
                        p.reduce_debt(debt_to_cover);
                    },
                );
            }
            ProtocolEvent::ReserveDataUpdated { reserve, .. } => {
                trace!(%reserve, "Reserve indexes updated");
            }
            ProtocolEvent::PriceUpdated { aggregator, answer, round_id } => {
                let Some(reserve) = self.cache.reserve_by_aggregator(aggregator) else {
                    outcome.foreign += 1;
                    debug!(%aggregator, "Price update from unknown aggregator ignored");
                    return;
                };
                if !answer.is_positive() {
                    warn!(%aggregator, %reserve, %answer, "Non-positive price answer ignored");
                    return;
                }
                let price = price_from_oracle(answer.into_raw());
                let previous = self.cache.update_price(reserve, price);
                debug!(%reserve, %round_id, price = %price, previous = ?previous, "Price updated from feed");
                outcome.mutations += 1;
                for holder in self.cache.holders(reserve) {
                    outcome.affect(holder);
                }
            }
        }
    }

    /// Track `user` if new, buffering its placeholder insert.
    async fn observe(&self, user: Address, block: u64, outcome: &mut BlockOutcome) {
        if !self.cache.track_user(user, Some(block)) {
            return;
        }
        debug!(%user, block, "New address tracked");
        outcome.new_users.push(user);

        let batch = {
            let mut pending = self.pending_inserts.lock();
            pending.push(UserAddress::placeholder(user, Some(block)));
            if pending.len() >= self.runtime.insert_flush_threshold() {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            if let Err(err) = self.write_placeholders(batch).await {
                warn!(error = %err, "Placeholder flush failed, kept for retry");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn adjust(
        &self,
        event: EventKind,
        user: Address,
        reserve: Address,
        block: u64,
        outcome: &mut BlockOutcome,
        properties: SmallVec<[UserReserveProperty; 2]>,
        mutate: impl FnOnce(&mut UserReserve),
    ) {
        if !self.block_should_be_applied(user, reserve) {
            outcome.gated += 1;
            debug!(%user, %reserve, event = event.name(), "No baseline yet, delta not applied");
            return;
        }

        let Some(position) = self.cache.update_user_reserve(user, reserve, |p| {
            mutate(p);
            p.clone()
        }) else {
            return;
        };
        self.cache.sync_configuration_bits(&position);

        outcome.mutations += 1;
        outcome.affect(user);
        outcome.audits.push(AuditRequest {
            event: Some(event),
            user,
            reserve,
            properties,
            block: Some(block),
        });
    }

    /// Write every buffered placeholder now.
    pub async fn flush_pending(&self) -> SyncResult<usize> {
        let batch = std::mem::take(&mut *self.pending_inserts.lock());
        if batch.is_empty() {
            return Ok(0);
        }
        self.write_placeholders(batch).await
    }

    async fn write_placeholders(&self, batch: Vec<UserAddress>) -> SyncResult<usize> {
        let network = &self.cache.network().name;
        let items = batch
            .iter()
            .map(|user| Ok(Upsert::insert_if_absent(RecordKey::user(network, user.address), to_record(user)?)))
            .collect::<SyncResult<Vec<_>>>()?;

        match self.store.bulk_upsert(items).await {
            Ok(summary) => {
                debug!(inserted = summary.inserted, batch = batch.len(), "Placeholders flushed");
                Ok(summary.inserted)
            }
            Err(err) => {
                let mut pending = self.pending_inserts.lock();
                let newer = std::mem::take(&mut *pending);
                *pending = batch;
                pending.extend(newer);
                Err(err)
            }
        }
    }
}
