//! Cached protocol state: networks, reserves, tracked users and their positions.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sentinel_chain::{ReserveConfiguration, UserConfiguration};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Chain identity and protocol contract addresses for one network.
///
/// Built once at startup. The price oracle may be left unset in config and is
/// then resolved on first use through the addresses provider.
#[derive(Debug)]
pub struct NetworkContext {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub pool: Address,
    pub data_provider: Address,
    pub addresses_provider: Address,
    pub multicall: Address,
    pub liquidation_executor: Option<Address>,
    /// Wrapped native token, used to price gas in USD.
    pub wrapped_native: Address,
    price_oracle: RwLock<Option<Address>>,
}

impl NetworkContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        chain_id: u64,
        rpc_url: impl Into<String>,
        pool: Address,
        data_provider: Address,
        addresses_provider: Address,
        multicall: Address,
        wrapped_native: Address,
    ) -> Self {
        Self {
            name: name.into(),
            chain_id,
            rpc_url: rpc_url.into(),
            pool,
            data_provider,
            addresses_provider,
            multicall,
            liquidation_executor: None,
            wrapped_native,
            price_oracle: RwLock::new(None),
        }
    }

    pub fn with_price_oracle(self, oracle: Option<Address>) -> Self {
        *self.price_oracle.write() = oracle;
        self
    }

    pub fn with_liquidation_executor(mut self, executor: Option<Address>) -> Self {
        self.liquidation_executor = executor;
        self
    }

    pub fn price_oracle(&self) -> Option<Address> {
        *self.price_oracle.read()
    }

    pub fn set_price_oracle(&self, oracle: Address) {
        *self.price_oracle.write() = Some(oracle);
    }
}

/// Baseline state of a cached record. `0` is a placeholder created from an
/// event; anything `>= 1` has been loaded from the chain at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SyncStatus(pub u8);

impl SyncStatus {
    pub const UNSYNCED: Self = Self(0);
    pub const BASELINE: Self = Self(1);

    pub fn is_synced(self) -> bool {
        self.0 >= 1
    }
}

/// One market of the lending pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reserve {
    pub address: Address,
    /// Position in the pool's reserves list, which fixes the user bitfield slot.
    pub index: usize,
    pub symbol: String,
    pub decimals: u8,
    pub price_usd: Decimal,
    pub ltv: u16,
    pub liquidation_threshold: u16,
    pub liquidation_bonus: u16,
    pub liquidation_protocol_fee: u16,
    pub borrow_cap: u64,
    pub supply_cap: u64,
    pub is_active: bool,
    pub is_frozen: bool,
    pub is_paused: bool,
    /// Price feed behind the oracle for this asset.
    pub aggregator: Address,
    pub updated_at: DateTime<Utc>,
}

impl Reserve {
    pub fn from_configuration(
        address: Address,
        index: usize,
        symbol: String,
        price_usd: Decimal,
        aggregator: Address,
        config: &ReserveConfiguration,
    ) -> Self {
        Self {
            address,
            index,
            symbol,
            decimals: config.decimals,
            price_usd,
            ltv: config.ltv,
            liquidation_threshold: config.liquidation_threshold,
            liquidation_bonus: config.liquidation_bonus,
            liquidation_protocol_fee: config.liquidation_protocol_fee,
            borrow_cap: config.borrow_cap,
            supply_cap: config.supply_cap,
            is_active: config.is_active,
            is_frozen: config.is_frozen,
            is_paused: config.is_paused,
            aggregator,
            updated_at: Utc::now(),
        }
    }
}

/// A borrower tracked on one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAddress {
    pub address: Address,
    #[serde(with = "configuration_serde")]
    pub configuration: UserConfiguration,
    pub total_collateral_base: Decimal,
    pub total_debt_base: Decimal,
    /// Collateral-weighted liquidation threshold, in basis points.
    pub current_liquidation_threshold: Decimal,
    pub health_factor: Decimal,
    pub status: SyncStatus,
    pub first_seen_block: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl UserAddress {
    /// Unsynced record for an address first seen in an event.
    pub fn placeholder(address: Address, block: Option<u64>) -> Self {
        Self {
            address,
            configuration: UserConfiguration::default(),
            total_collateral_base: Decimal::ZERO,
            total_debt_base: Decimal::ZERO,
            current_liquidation_threshold: Decimal::ZERO,
            health_factor: Decimal::ZERO,
            status: SyncStatus::UNSYNCED,
            first_seen_block: block,
            updated_at: Utc::now(),
        }
    }

    pub fn has_debt(&self) -> bool {
        !self.total_debt_base.is_zero()
    }
}

mod configuration_serde {
    use alloy::primitives::U256;
    use sentinel_chain::UserConfiguration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(config: &UserConfiguration, s: S) -> Result<S::Ok, S::Error> {
        config.0.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<UserConfiguration, D::Error> {
        U256::deserialize(d).map(UserConfiguration)
    }
}

/// A user's position in one reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReserve {
    pub user: Address,
    pub reserve: Address,
    pub current_a_token_balance: U256,
    pub current_stable_debt: U256,
    pub current_variable_debt: U256,
    pub usage_as_collateral_enabled: bool,
    pub status: SyncStatus,
}

impl UserReserve {
    pub fn empty(user: Address, reserve: Address, status: SyncStatus) -> Self {
        Self {
            user,
            reserve,
            current_a_token_balance: U256::ZERO,
            current_stable_debt: U256::ZERO,
            current_variable_debt: U256::ZERO,
            usage_as_collateral_enabled: false,
            status,
        }
    }

    pub fn total_debt(&self) -> U256 {
        self.current_stable_debt.saturating_add(self.current_variable_debt)
    }

    pub fn has_debt(&self) -> bool {
        !self.total_debt().is_zero()
    }

    pub fn is_collateral(&self) -> bool {
        self.usage_as_collateral_enabled && !self.current_a_token_balance.is_zero()
    }

    /// Repay debt: variable first, then stable. Returns what could not be applied.
    pub fn reduce_debt(&mut self, amount: U256) -> U256 {
        let from_variable = amount.min(self.current_variable_debt);
        self.current_variable_debt -= from_variable;
        let rest = amount - from_variable;
        let from_stable = rest.min(self.current_stable_debt);
        self.current_stable_debt -= from_stable;
        rest - from_stable
    }

    /// String-normalized value of one property, as compared by audits.
    pub fn property(&self, property: UserReserveProperty) -> String {
        match property {
            UserReserveProperty::CurrentATokenBalance => self.current_a_token_balance.to_string(),
            UserReserveProperty::CurrentStableDebt => self.current_stable_debt.to_string(),
            UserReserveProperty::CurrentVariableDebt => self.current_variable_debt.to_string(),
            UserReserveProperty::UsageAsCollateralEnabled => {
                self.usage_as_collateral_enabled.to_string()
            }
        }
    }
}

/// Auditable fields of a [`UserReserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserReserveProperty {
    CurrentATokenBalance,
    CurrentStableDebt,
    CurrentVariableDebt,
    UsageAsCollateralEnabled,
}

impl UserReserveProperty {
    pub const ALL: [UserReserveProperty; 4] = [
        UserReserveProperty::CurrentATokenBalance,
        UserReserveProperty::CurrentStableDebt,
        UserReserveProperty::CurrentVariableDebt,
        UserReserveProperty::UsageAsCollateralEnabled,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UserReserveProperty::CurrentATokenBalance => "currentATokenBalance",
            UserReserveProperty::CurrentStableDebt => "currentStableDebt",
            UserReserveProperty::CurrentVariableDebt => "currentVariableDebt",
            UserReserveProperty::UsageAsCollateralEnabled => "usageAsCollateralEnabled",
        }
    }
}

impl fmt::Display for UserReserveProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UserReserveProperty {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SyncError::Validation(format!("unknown user reserve property: {s}")))
    }
}
