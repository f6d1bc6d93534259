//! In-memory [`ChainClient`] for tests.
//!
//! Read calls are answered by a handler closure. Calls addressed to the
//! configured multicall helper are unpacked, each inner call is routed through
//! the same handler, and the answers are packed back into an `aggregate`
//! return, so batched and direct reads share one fixture.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::contracts::IMulticall;
use crate::error::{ChainError, ChainResult};
use crate::provider::{BlockTag, ChainClient};

type ContractHandler = dyn Fn(Address, &[u8]) -> ChainResult<Bytes> + Send + Sync;
type LatencyFn = dyn Fn(&[IMulticall::Call]) -> Duration + Send + Sync;

pub struct FakeChain {
    chain_id: u64,
    multicall: Address,
    block: AtomicU64,
    nonce: AtomicU64,
    gas_price: u128,
    priority_fee: u128,
    base_fee: Option<u128>,
    gas_estimate: u64,
    handler: Box<ContractHandler>,
    latency: Box<LatencyFn>,
    simulation_failure: Mutex<Option<String>>,
    /// Every `eth_call` observed, with the block it targeted.
    pub calls: Mutex<Vec<(TransactionRequest, BlockTag)>>,
    /// Number of inner calls per `aggregate` request, in arrival order.
    pub aggregate_sizes: Mutex<Vec<usize>>,
}

impl FakeChain {
    pub fn new(
        multicall: Address,
        handler: impl Fn(Address, &[u8]) -> ChainResult<Bytes> + Send + Sync + 'static,
    ) -> Self {
        Self {
            chain_id: 1,
            multicall,
            block: AtomicU64::new(1_000),
            nonce: AtomicU64::new(0),
            gas_price: 1_000_000_000,
            priority_fee: 100_000_000,
            base_fee: Some(20_000_000_000),
            gas_estimate: 21_000,
            handler: Box::new(handler),
            latency: Box::new(|_| Duration::ZERO),
            simulation_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            aggregate_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Delay each `aggregate` answer by the returned duration.
    pub fn with_latency(
        mut self,
        latency: impl Fn(&[IMulticall::Call]) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Box::new(latency);
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_base_fee(mut self, base_fee: Option<u128>) -> Self {
        self.base_fee = base_fee;
        self
    }

    pub fn with_gas_estimate(mut self, gas: u64) -> Self {
        self.gas_estimate = gas;
        self
    }

    pub fn set_network_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    /// Make every pending-block call revert with `reason`, or clear it.
    pub fn fail_simulations(&self, reason: Option<&str>) {
        *self.simulation_failure.lock() = reason.map(str::to_owned);
    }

    fn answer(&self, tx: &TransactionRequest) -> ChainResult<(Bytes, Duration)> {
        let to = tx
            .to
            .and_then(|kind| kind.to().copied())
            .ok_or_else(|| ChainError::Validation("call without target".into()))?;
        let input = tx.input.input().cloned().unwrap_or_default();

        if to != self.multicall {
            return (self.handler)(to, &input).map(|out| (out, Duration::ZERO));
        }

        let decoded = IMulticall::aggregateCall::abi_decode(&input, true)
            .map_err(|e| ChainError::decode("aggregate", e))?;
        self.aggregate_sizes.lock().push(decoded.calls.len());
        let delay = (self.latency)(&decoded.calls);

        let mut results = Vec::with_capacity(decoded.calls.len());
        for call in &decoded.calls {
            results.push((self.handler)(call.target, &call.callData)?);
        }
        let block = U256::from(self.block.load(Ordering::SeqCst));
        Ok(((block, results).abi_encode_params().into(), delay))
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn call(&self, tx: TransactionRequest, block: BlockTag) -> ChainResult<Bytes> {
        self.calls.lock().push((tx.clone(), block));
        if block == BlockTag::Pending {
            if let Some(reason) = self.simulation_failure.lock().clone() {
                return Err(ChainError::Rejected(reason));
            }
        }
        let (out, delay) = self.answer(&tx)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(out)
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> ChainResult<u64> {
        let inner = tx
            .input
            .input()
            .and_then(|input| IMulticall::aggregateCall::abi_decode(input, true).ok())
            .map(|decoded| decoded.calls.len() as u64)
            .unwrap_or(1);
        Ok(self.gas_estimate * inner)
    }

    async fn transaction_count(&self, _address: Address) -> ChainResult<u64> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        Ok(self.gas_price)
    }

    async fn max_priority_fee(&self) -> ChainResult<u128> {
        Ok(self.priority_fee)
    }

    async fn base_fee(&self) -> ChainResult<Option<u128>> {
        Ok(self.base_fee)
    }

    async fn get_logs(&self, _filter: &Filter) -> ChainResult<Vec<Log>> {
        Ok(Vec::new())
    }
}
