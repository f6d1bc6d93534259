//! In-memory lending pool answering the reads this crate issues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolValue};
use parking_lot::Mutex;
use sentinel_chain::contracts::{
    IERC20Metadata, ILiquidationExecutor, IPool, IPoolAddressesProvider, IPoolDataProvider,
    IPriceOracle,
};
use sentinel_chain::testing::FakeChain;
use sentinel_chain::{ChainError, ChainResult, MulticallBatcher};

use crate::cache::fixtures;
use crate::model::NetworkContext;

#[derive(Debug, Clone)]
pub struct FakeReserve {
    pub address: Address,
    pub configuration: U256,
    pub symbol: String,
    /// Oracle price, 8 decimals.
    pub price: U256,
    pub source: Address,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FakePosition {
    pub a_token: U256,
    pub stable_debt: U256,
    pub variable_debt: U256,
    pub collateral: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FakeAccount {
    pub collateral_base: U256,
    pub debt_base: U256,
    pub liquidation_threshold: U256,
    pub health_factor: U256,
}

/// Packed reserve configuration word.
pub fn configuration_word(ltv: u16, threshold: u16, bonus: u16, decimals: u8, protocol_fee: u16) -> U256 {
    U256::from(ltv)
        | (U256::from(threshold) << 16)
        | (U256::from(bonus) << 32)
        | (U256::from(decimals) << 48)
        | (U256::from(1u8) << 56)
        | (U256::from(protocol_fee) << 152)
}

pub struct FakeProtocol {
    pub network: Arc<NetworkContext>,
    pub oracle: Address,
    pub reserves: Mutex<Vec<FakeReserve>>,
    pub positions: Mutex<HashMap<(Address, Address), FakePosition>>,
    pub user_configurations: Mutex<HashMap<Address, U256>>,
    pub accounts: Mutex<HashMap<Address, FakeAccount>>,
    /// Reserves whose `getConfiguration` returns undecodable data.
    pub unreadable_configurations: Mutex<HashSet<Address>>,
}

impl FakeProtocol {
    /// The two fixture reserves (WETH at $2000, USDC at $1).
    pub fn new() -> Arc<Self> {
        let network = fixtures::network();
        let oracle = network.price_oracle().unwrap_or(Address::repeat_byte(0xa4));
        let reserves = fixtures::reserves()
            .into_iter()
            .map(|r| FakeReserve {
                address: r.address,
                configuration: configuration_word(8000, 8250, 10500, r.decimals, 1000),
                symbol: r.symbol,
                price: crate::decimal::from_decimal(r.price_usd, 8),
                source: r.aggregator,
            })
            .collect();
        Arc::new(Self {
            network,
            oracle,
            reserves: Mutex::new(reserves),
            positions: Mutex::new(HashMap::new()),
            user_configurations: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            unreadable_configurations: Mutex::new(HashSet::new()),
        })
    }

    pub fn chain(self: &Arc<Self>) -> Arc<FakeChain> {
        let protocol = self.clone();
        Arc::new(FakeChain::new(self.network.multicall, move |target, data| {
            protocol.handle(target, data)
        }))
    }

    pub fn batcher(self: &Arc<Self>) -> (Arc<FakeChain>, Arc<MulticallBatcher>) {
        let chain = self.chain();
        let batcher = Arc::new(MulticallBatcher::new(chain.clone(), self.network.multicall));
        (chain, batcher)
    }

    pub fn set_position(&self, user: Address, reserve: Address, position: FakePosition) {
        self.positions.lock().insert((user, reserve), position);
    }

    pub fn set_user_configuration(&self, user: Address, configuration: U256) {
        self.user_configurations.lock().insert(user, configuration);
    }

    pub fn set_account(&self, user: Address, account: FakeAccount) {
        self.accounts.lock().insert(user, account);
    }

    fn reserve(&self, asset: Address) -> ChainResult<FakeReserve> {
        self.reserves
            .lock()
            .iter()
            .find(|r| r.address == asset)
            .cloned()
            .ok_or_else(|| ChainError::Rejected("execution reverted: unknown asset".into()))
    }

    fn handle(&self, target: Address, data: &[u8]) -> ChainResult<Bytes> {
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| ChainError::Rejected("empty calldata".into()))?;
        let decode = |e: alloy::sol_types::Error| ChainError::decode("fake protocol", e);
        let network = &self.network;

        let encoded = if target == network.pool && selector == IPool::getReservesListCall::SELECTOR {
            let list: Vec<Address> = self.reserves.lock().iter().map(|r| r.address).collect();
            (list,).abi_encode_params()
        } else if target == network.pool && selector == IPool::getConfigurationCall::SELECTOR {
            let call = IPool::getConfigurationCall::abi_decode(data, true).map_err(decode)?;
            if self.unreadable_configurations.lock().contains(&call.asset) {
                Vec::new()
            } else {
                self.reserve(call.asset)?.configuration.abi_encode()
            }
        } else if target == network.pool && selector == IPool::getUserConfigurationCall::SELECTOR {
            let call = IPool::getUserConfigurationCall::abi_decode(data, true).map_err(decode)?;
            let configuration = self
                .user_configurations
                .lock()
                .get(&call.user)
                .copied()
                .unwrap_or_default();
            configuration.abi_encode()
        } else if target == network.pool && selector == IPool::getUserAccountDataCall::SELECTOR {
            let call = IPool::getUserAccountDataCall::abi_decode(data, true).map_err(decode)?;
            let account = self.accounts.lock().get(&call.user).copied().unwrap_or_default();
            (
                account.collateral_base,
                account.debt_base,
                U256::ZERO,
                account.liquidation_threshold,
                U256::ZERO,
                account.health_factor,
            )
                .abi_encode_params()
        } else if target == network.data_provider
            && selector == IPoolDataProvider::getUserReserveDataCall::SELECTOR
        {
            let call = IPoolDataProvider::getUserReserveDataCall::abi_decode(data, true).map_err(decode)?;
            let p = self
                .positions
                .lock()
                .get(&(call.user, call.asset))
                .copied()
                .unwrap_or_default();
            (
                p.a_token,
                p.stable_debt,
                p.variable_debt,
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
                p.collateral,
            )
                .abi_encode_params()
        } else if target == network.addresses_provider
            && selector == IPoolAddressesProvider::getPriceOracleCall::SELECTOR
        {
            self.oracle.abi_encode()
        } else if target == self.oracle && selector == IPriceOracle::getAssetPriceCall::SELECTOR {
            let call = IPriceOracle::getAssetPriceCall::abi_decode(data, true).map_err(decode)?;
            self.reserve(call.asset)?.price.abi_encode()
        } else if target == self.oracle && selector == IPriceOracle::getSourceOfAssetCall::SELECTOR {
            let call = IPriceOracle::getSourceOfAssetCall::abi_decode(data, true).map_err(decode)?;
            self.reserve(call.asset)?.source.abi_encode()
        } else if Some(target) == network.liquidation_executor
            && selector == ILiquidationExecutor::liquidateCall::SELECTOR
        {
            Vec::new()
        } else if selector == IERC20Metadata::symbolCall::SELECTOR {
            (self.reserve(target)?.symbol,).abi_encode_params()
        } else {
            return Err(ChainError::Rejected(format!(
                "execution reverted: no handler for {target} 0x{}",
                alloy::hex::encode(selector)
            )));
        };
        Ok(encoded.into())
    }
}
