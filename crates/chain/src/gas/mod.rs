//! Gas pricing strategies.
//!
//! Chains without a fee market price transactions with a single gas price;
//! EIP-1559 chains need a max fee and a priority tip. Both are fetched through
//! the [`ChainClient`] and applied to a request by the executor, and the
//! effective price also feeds the liquidation engine's gas cost estimate.

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;

use std::fmt::Debug;

use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChainResult;
use crate::provider::ChainClient;

const GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasParams {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        base_fee: u128,
    },
}

impl GasParams {
    /// Price per gas unit used for cost estimates.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 {
                base_fee,
                max_priority_fee_per_gas,
                max_fee_per_gas,
            } => (*base_fee + *max_priority_fee_per_gas).min(*max_fee_per_gas),
        }
    }
}

#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Current parameters from the chain. Falls back to cached values when
    /// the node does not answer.
    async fn fetch_params(&self, client: &dyn ChainClient) -> ChainResult<GasParams>;

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    fn strategy_name(&self) -> &'static str;
}

/// Pricing model per network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasPricing {
    #[default]
    Eip1559,
    Legacy,
}

/// Gas settings per network, in gwei.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasSettings {
    #[serde(default)]
    pub pricing: GasPricing,
    #[serde(default = "default_gas_price_gwei")]
    pub default_gas_price_gwei: u64,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_priority_fee_gwei")]
    pub priority_fee_gwei: u64,
    /// Max fee as a percentage of base fee, before adding the tip.
    #[serde(default = "default_max_fee_percent")]
    pub max_fee_percent: u32,
}

fn default_gas_price_gwei() -> u64 {
    1
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_priority_fee_gwei() -> u64 {
    2
}

fn default_max_fee_percent() -> u32 {
    200
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            pricing: GasPricing::default(),
            default_gas_price_gwei: default_gas_price_gwei(),
            max_gas_price_gwei: default_max_gas_price_gwei(),
            priority_fee_gwei: default_priority_fee_gwei(),
            max_fee_percent: default_max_fee_percent(),
        }
    }
}

pub fn create_gas_strategy(settings: &GasSettings) -> Box<dyn GasStrategy> {
    let max = settings.max_gas_price_gwei as u128 * GWEI;
    match settings.pricing {
        GasPricing::Eip1559 => Box::new(
            Eip1559GasStrategy::new(settings.priority_fee_gwei as u128 * GWEI, settings.max_fee_percent)
                .with_max_fee_cap(max),
        ),
        GasPricing::Legacy => Box::new(LegacyGasStrategy::new(
            settings.default_gas_price_gwei as u128 * GWEI,
            max,
        )),
    }
}
