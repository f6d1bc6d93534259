//! Single gas price, for chains without a fee market.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use tracing::warn;

use super::{GasParams, GasStrategy};
use crate::error::ChainResult;
use crate::provider::ChainClient;

#[derive(Debug)]
pub struct LegacyGasStrategy {
    max_gas_price: u128,
    /// Last observed price, used when the node does not answer.
    cached_gas_price: AtomicU64,
}

impl LegacyGasStrategy {
    pub fn new(default_gas_price: u128, max_gas_price: u128) -> Self {
        Self {
            max_gas_price,
            cached_gas_price: AtomicU64::new(default_gas_price.min(u64::MAX as u128) as u64),
        }
    }

    pub fn cached_gas_price(&self) -> u128 {
        self.cached_gas_price.load(Ordering::Relaxed) as u128
    }

    fn update_cache(&self, gas_price: u128) -> u128 {
        let capped = gas_price.min(self.max_gas_price);
        self.cached_gas_price
            .store(capped.min(u64::MAX as u128) as u64, Ordering::Relaxed);
        capped
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, client: &dyn ChainClient) -> ChainResult<GasParams> {
        let gas_price = match client.gas_price().await {
            Ok(price) => self.update_cache(price),
            Err(err) => {
                warn!(error = %err, "Gas price unavailable, using cached value");
                self.cached_gas_price()
            }
        };
        Ok(GasParams::Legacy { gas_price })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Legacy { gas_price } => tx.set_gas_price(*gas_price),
            GasParams::Eip1559 { max_fee_per_gas, .. } => tx.set_gas_price(*max_fee_per_gas),
        }
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChain;
    use alloy::primitives::{Address, Bytes};

    #[tokio::test]
    async fn test_fetch_caps_at_max() {
        let chain = FakeChain::new(Address::ZERO, |_, _| Ok(Bytes::new()))
            .with_gas_price(20_000_000_000);
        let strategy = LegacyGasStrategy::new(1_000_000_000, 10_000_000_000);

        let params = strategy.fetch_params(&chain).await.unwrap();
        assert_eq!(params, GasParams::Legacy { gas_price: 10_000_000_000 });
        assert_eq!(strategy.cached_gas_price(), 10_000_000_000);
    }

    #[test]
    fn test_apply_gas() {
        let strategy = LegacyGasStrategy::new(1_000_000_000, 10_000_000_000);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        strategy.apply_gas(&mut tx, &GasParams::Legacy { gas_price: 5_000_000_000 });
        assert_eq!(tx.gas_price, Some(5_000_000_000));
    }
}
