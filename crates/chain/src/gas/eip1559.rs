//! Base fee plus priority tip pricing.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use tracing::warn;

use super::{GasParams, GasStrategy};
use crate::error::ChainResult;
use crate::provider::ChainClient;

/// Used until the first base fee is observed.
const FALLBACK_BASE_FEE: u64 = 30_000_000_000;

#[derive(Debug)]
pub struct Eip1559GasStrategy {
    default_priority_fee: u128,
    /// Max fee as a percentage of base fee (200 = 2x), tip added on top.
    max_fee_percent: u32,
    max_fee_cap: u128,
    cached_base_fee: AtomicU64,
}

impl Eip1559GasStrategy {
    pub fn new(default_priority_fee: u128, max_fee_percent: u32) -> Self {
        Self {
            default_priority_fee,
            max_fee_percent,
            max_fee_cap: 500_000_000_000,
            cached_base_fee: AtomicU64::new(FALLBACK_BASE_FEE),
        }
    }

    pub fn with_max_fee_cap(mut self, cap: u128) -> Self {
        self.max_fee_cap = cap;
        self
    }

    pub fn cached_base_fee(&self) -> u128 {
        self.cached_base_fee.load(Ordering::Relaxed) as u128
    }

    fn max_fee(&self, base_fee: u128, priority_fee: u128) -> u128 {
        (base_fee * self.max_fee_percent as u128 / 100 + priority_fee).min(self.max_fee_cap)
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, client: &dyn ChainClient) -> ChainResult<GasParams> {
        let base_fee = match client.base_fee().await {
            Ok(Some(base_fee)) => {
                self.cached_base_fee
                    .store(base_fee.min(u64::MAX as u128) as u64, Ordering::Relaxed);
                base_fee
            }
            Ok(None) => self.cached_base_fee(),
            Err(err) => {
                warn!(error = %err, "Base fee unavailable, using cached value");
                self.cached_base_fee()
            }
        };

        let priority_fee = client
            .max_priority_fee()
            .await
            .unwrap_or(self.default_priority_fee);

        Ok(GasParams::Eip1559 {
            max_fee_per_gas: self.max_fee(base_fee, priority_fee),
            max_priority_fee_per_gas: priority_fee,
            base_fee,
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
            GasParams::Legacy { gas_price } => {
                tx.set_max_fee_per_gas(*gas_price);
                tx.set_max_priority_fee_per_gas(self.default_priority_fee.min(*gas_price));
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChain;
    use alloy::primitives::{Address, Bytes};

    #[test]
    fn test_max_fee_calculation() {
        let strategy = Eip1559GasStrategy::new(2_000_000_000, 150);
        assert_eq!(strategy.max_fee(30_000_000_000, 2_000_000_000), 47_000_000_000);

        let capped = Eip1559GasStrategy::new(2_000_000_000, 200).with_max_fee_cap(10_000_000_000);
        assert_eq!(capped.max_fee(30_000_000_000, 2_000_000_000), 10_000_000_000);
    }

    #[tokio::test]
    async fn test_fetch_uses_chain_base_fee() {
        let chain = FakeChain::new(Address::ZERO, |_, _| Ok(Bytes::new()))
            .with_base_fee(Some(10_000_000_000));
        let strategy = Eip1559GasStrategy::new(2_000_000_000, 200);

        let params = strategy.fetch_params(&chain).await.unwrap();
        assert_eq!(
            params,
            GasParams::Eip1559 {
                max_fee_per_gas: 20_100_000_000,
                max_priority_fee_per_gas: 100_000_000,
                base_fee: 10_000_000_000,
            }
        );
        assert_eq!(strategy.cached_base_fee(), 10_000_000_000);
    }

    #[test]
    fn test_apply_gas() {
        let strategy = Eip1559GasStrategy::new(2_000_000_000, 200);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        strategy.apply_gas(
            &mut tx,
            &GasParams::Eip1559 {
                max_fee_per_gas: 50_000_000_000,
                max_priority_fee_per_gas: 2_000_000_000,
                base_fee: 24_000_000_000,
            },
        );
        assert_eq!(tx.max_fee_per_gas, Some(50_000_000_000));
        assert_eq!(tx.max_priority_fee_per_gas, Some(2_000_000_000));
    }
}
