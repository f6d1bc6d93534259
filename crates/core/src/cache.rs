//! Per-network in-memory mirror of reserves, tracked users and positions.
//!
//! Reads clone out of the maps; writes go through closures so no map guard
//! is held across an await point. Mutations are serialized by the network's
//! runner, so this type only guarantees per-entry atomicity.

use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::Address;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::model::{NetworkContext, Reserve, SyncStatus, UserAddress, UserReserve};

pub struct ChainStateCache {
    network: Arc<NetworkContext>,
    reserves: DashMap<Address, Reserve>,
    /// Reserve addresses in pool list order.
    reserve_order: RwLock<Vec<Address>>,
    /// Pool list index -> reserve. Skipped reserves leave a gap.
    by_index: DashMap<usize, Address>,
    /// Aggregator -> reserve.
    aggregators: DashMap<Address, Address>,
    users: DashMap<Address, UserAddress>,
    positions: DashMap<(Address, Address), UserReserve>,
    /// Reserve -> users holding a position in it.
    holders: DashMap<Address, HashSet<Address>>,
}

impl ChainStateCache {
    pub fn new(network: Arc<NetworkContext>) -> Self {
        Self {
            network,
            reserves: DashMap::new(),
            reserve_order: RwLock::new(Vec::new()),
            by_index: DashMap::new(),
            aggregators: DashMap::new(),
            users: DashMap::new(),
            positions: DashMap::new(),
            holders: DashMap::new(),
        }
    }

    pub fn network(&self) -> &Arc<NetworkContext> {
        &self.network
    }

    // Reserves

    /// Replace the reserve set. `reserves` must be in pool list order.
    pub fn set_reserves(&self, reserves: Vec<Reserve>) {
        let order: Vec<Address> = reserves.iter().map(|r| r.address).collect();
        self.aggregators.clear();
        self.by_index.clear();
        self.reserves.retain(|address, _| order.contains(address));
        for reserve in reserves {
            self.by_index.insert(reserve.index, reserve.address);
            if !reserve.aggregator.is_zero() {
                self.aggregators.insert(reserve.aggregator, reserve.address);
            }
            self.reserves.insert(reserve.address, reserve);
        }
        debug!(network = %self.network.name, reserves = order.len(), "Reserve set replaced");
        *self.reserve_order.write() = order;
    }

    pub fn reserve(&self, address: Address) -> Option<Reserve> {
        self.reserves.get(&address).map(|r| r.clone())
    }

    /// All reserves in pool list order.
    pub fn reserves(&self) -> Vec<Reserve> {
        self.reserve_order
            .read()
            .iter()
            .filter_map(|address| self.reserve(*address))
            .collect()
    }

    pub fn reserve_addresses(&self) -> Vec<Address> {
        self.reserve_order.read().clone()
    }

    /// Reserve at `index` in the pool's reserves list, the position its
    /// flags occupy in a user configuration bitfield.
    pub fn reserve_at(&self, index: usize) -> Option<Reserve> {
        let address = self.by_index.get(&index).map(|a| *a)?;
        self.reserve(address)
    }

    pub fn reserve_by_aggregator(&self, aggregator: Address) -> Option<Address> {
        self.aggregators.get(&aggregator).map(|r| *r)
    }

    pub fn aggregator_addresses(&self) -> Vec<Address> {
        self.aggregators.iter().map(|entry| *entry.key()).collect()
    }

    /// Returns the previous price, or `None` for an unknown reserve.
    pub fn update_price(&self, reserve: Address, price_usd: Decimal) -> Option<Decimal> {
        self.reserves.get_mut(&reserve).map(|mut r| {
            let previous = r.price_usd;
            r.price_usd = price_usd;
            r.updated_at = Utc::now();
            previous
        })
    }

    // Users

    /// Start tracking `address` as an unsynced placeholder. Returns `false`
    /// if it is already tracked.
    pub fn track_user(&self, address: Address, block: Option<u64>) -> bool {
        let mut inserted = false;
        self.users.entry(address).or_insert_with(|| {
            inserted = true;
            UserAddress::placeholder(address, block)
        });
        inserted
    }

    pub fn is_tracked(&self, address: Address) -> bool {
        self.users.contains_key(&address)
    }

    pub fn user(&self, address: Address) -> Option<UserAddress> {
        self.users.get(&address).map(|u| u.clone())
    }

    /// Mutate a tracked user in place. Returns `None` if it is not tracked.
    pub fn update_user<R>(&self, address: Address, f: impl FnOnce(&mut UserAddress) -> R) -> Option<R> {
        self.users.get_mut(&address).map(|mut user| {
            let result = f(&mut user);
            user.updated_at = Utc::now();
            result
        })
    }

    pub fn tracked_users(&self) -> Vec<Address> {
        self.users.iter().map(|entry| *entry.key()).collect()
    }

    pub fn unsynced_users(&self) -> Vec<Address> {
        self.users
            .iter()
            .filter(|entry| !entry.status.is_synced())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Drop a user and every position it holds.
    pub fn remove_user(&self, address: Address) -> Option<UserAddress> {
        let removed = self.users.remove(&address).map(|(_, user)| user);
        for reserve in self.reserve_addresses() {
            self.remove_user_reserve(address, reserve);
        }
        removed
    }

    // Positions

    pub fn user_reserve(&self, user: Address, reserve: Address) -> Option<UserReserve> {
        self.positions.get(&(user, reserve)).map(|p| p.clone())
    }

    pub fn user_reserves(&self, user: Address) -> Vec<UserReserve> {
        self.reserve_addresses()
            .into_iter()
            .filter_map(|reserve| self.user_reserve(user, reserve))
            .collect()
    }

    pub fn upsert_user_reserve(&self, position: UserReserve) {
        self.holders
            .entry(position.reserve)
            .or_default()
            .insert(position.user);
        self.positions.insert((position.user, position.reserve), position);
    }

    /// Mutate a cached position in place. Returns `None` if it does not exist.
    pub fn update_user_reserve<R>(
        &self,
        user: Address,
        reserve: Address,
        f: impl FnOnce(&mut UserReserve) -> R,
    ) -> Option<R> {
        self.positions.get_mut(&(user, reserve)).map(|mut p| f(&mut p))
    }

    /// Cached position, created empty with `status` if missing.
    pub fn ensure_user_reserve(&self, user: Address, reserve: Address, status: SyncStatus) -> UserReserve {
        if let Some(existing) = self.user_reserve(user, reserve) {
            return existing;
        }
        let position = UserReserve::empty(user, reserve, status);
        self.upsert_user_reserve(position.clone());
        position
    }

    /// Mirror a position's flags into its user's configuration bitfield.
    pub fn sync_configuration_bits(&self, position: &UserReserve) {
        let Some(index) = self.reserve(position.reserve).map(|r| r.index) else {
            return;
        };
        let borrowing = position.has_debt();
        let collateral = position.usage_as_collateral_enabled;
        self.update_user(position.user, |user| {
            user.configuration.set_borrowing(index, borrowing);
            user.configuration.set_using_as_collateral(index, collateral);
        });
    }

    pub fn remove_user_reserve(&self, user: Address, reserve: Address) -> Option<UserReserve> {
        if let Some(mut holders) = self.holders.get_mut(&reserve) {
            holders.remove(&user);
        }
        self.positions.remove(&(user, reserve)).map(|(_, p)| p)
    }

    /// Users with a cached position in `reserve`.
    pub fn holders(&self, reserve: Address) -> Vec<Address> {
        self.holders
            .get(&reserve)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared cache fixtures for tests in this crate.

    use super::*;
    use std::str::FromStr;

    pub fn network() -> Arc<NetworkContext> {
        Arc::new(
            NetworkContext::new(
                "testnet",
                1,
                "http://localhost:8545",
                Address::repeat_byte(0xa0),
                Address::repeat_byte(0xa1),
                Address::repeat_byte(0xa2),
                Address::repeat_byte(0xa3),
                Address::repeat_byte(0x10),
            )
            .with_price_oracle(Some(Address::repeat_byte(0xa4)))
            .with_liquidation_executor(Some(Address::repeat_byte(0xa5))),
        )
    }

    pub fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Reserve `0x10..` (WETH-like, 18 decimals, $2000) at index 0 and
    /// `0x20..` (USDC-like, 6 decimals, $1) at index 1.
    pub fn reserves() -> Vec<Reserve> {
        let reserve = |byte: u8, index: usize, symbol: &str, decimals: u8, price: &str| Reserve {
            address: Address::repeat_byte(byte),
            index,
            symbol: symbol.to_string(),
            decimals,
            price_usd: dec(price),
            ltv: 8000,
            liquidation_threshold: 8250,
            liquidation_bonus: 10500,
            liquidation_protocol_fee: 1000,
            borrow_cap: 0,
            supply_cap: 0,
            is_active: true,
            is_frozen: false,
            is_paused: false,
            aggregator: Address::repeat_byte(byte + 0x40),
            updated_at: Utc::now(),
        };
        vec![
            reserve(0x10, 0, "WETH", 18, "2000"),
            reserve(0x20, 1, "USDC", 6, "1"),
        ]
    }

    pub fn cache() -> Arc<ChainStateCache> {
        let cache = ChainStateCache::new(network());
        cache.set_reserves(reserves());
        Arc::new(cache)
    }
}
