//! Chunked multicall batching.
//!
//! Many read-only calls are packed into `aggregate` requests against a
//! multicall helper. The call list is split into fixed-size chunks before
//! anything is dispatched; each chunk owns a contiguous range of original
//! indices, so results land in caller order no matter which chunk resolves
//! first or fails. A failing chunk marks only its own indices as failed.

use std::ops::Range;
use std::sync::Arc;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use futures::future::join_all;
use sentinel_api::{EthCallRequest, JsonRpcClient};
use tracing::{debug, instrument, warn};

use crate::contracts::IMulticall;
use crate::error::{ChainError, ChainResult};
use crate::executor::{SubmissionOutcome, TransactionExecutor, TxIntent};
use crate::provider::{BlockTag, ChainClient};

/// Default number of calls per `aggregate` request.
pub const DEFAULT_CHUNK_SIZE: usize = 300;

/// An encoded call against one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCall {
    pub target: Address,
    pub call_data: Bytes,
}

impl RawCall {
    pub fn new<C: SolCall>(target: Address, call: &C) -> Self {
        Self {
            target,
            call_data: call.abi_encode().into(),
        }
    }
}

/// A call argument given either once (broadcast to every call) or per call.
#[derive(Debug, Clone)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        Self::One(value)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values)
    }
}

impl<T: Clone> OneOrMany<T> {
    fn explicit_len(&self) -> Option<usize> {
        match self {
            Self::One(_) => None,
            Self::Many(values) => Some(values.len()),
        }
    }

    fn expand(self, len: usize) -> Vec<T> {
        match self {
            Self::One(value) => vec![value; len],
            Self::Many(values) => values,
        }
    }
}

/// Broadcast targets and calls into equal-length parallel lists.
///
/// Lists given explicitly must agree in length; a scalar takes the length of
/// the other side (or 1 when both are scalars).
pub fn normalize<C: Clone>(
    targets: OneOrMany<Address>,
    calls: OneOrMany<C>,
) -> ChainResult<Vec<(Address, C)>> {
    let len = match (targets.explicit_len(), calls.explicit_len()) {
        (Some(t), Some(c)) if t != c => {
            return Err(ChainError::Validation(format!(
                "{t} targets but {c} calls"
            )))
        }
        (Some(n), _) | (None, Some(n)) => n,
        (None, None) => 1,
    };
    Ok(targets.expand(len).into_iter().zip(calls.expand(len)).collect())
}

/// Split `len` calls into contiguous ranges of at most `chunk_size`.
pub fn chunk_plan(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

/// What to do with a batch.
pub enum MulticallMode<'a> {
    /// Read-only `aggregate` per chunk.
    Read,
    /// One gas estimate over the whole unchunked batch.
    EstimateGas,
    /// Sign and privately submit one `aggregate` transaction per chunk.
    PrivateTx(&'a TransactionExecutor),
}

#[derive(Debug)]
pub enum MulticallOutcome {
    Results(Vec<ChainResult<Bytes>>),
    GasEstimate(u64),
    Submissions(Vec<ChainResult<SubmissionOutcome>>),
}

pub struct MulticallBatcher {
    client: Arc<dyn ChainClient>,
    multicall_address: Address,
    chunk_size: usize,
}

impl MulticallBatcher {
    pub fn new(client: Arc<dyn ChainClient>, multicall_address: Address) -> Self {
        Self {
            client,
            multicall_address,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size == 0 {
            warn!("Multicall chunk size 0 requested, using 1");
        }
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn multicall_address(&self) -> Address {
        self.multicall_address
    }

    fn aggregate_calldata(calls: &[RawCall]) -> Bytes {
        let calls = calls
            .iter()
            .map(|call| IMulticall::Call {
                target: call.target,
                callData: call.call_data.clone(),
            })
            .collect();
        IMulticall::aggregateCall { calls }.abi_encode().into()
    }

    fn aggregate_request(&self, calls: &[RawCall]) -> TransactionRequest {
        TransactionRequest::default()
            .with_to(self.multicall_address)
            .with_input(Self::aggregate_calldata(calls))
    }

    async fn aggregate_chunk(&self, calls: &[RawCall]) -> ChainResult<Vec<Bytes>> {
        let output = self
            .client
            .call(self.aggregate_request(calls), BlockTag::Latest)
            .await?;
        let decoded = IMulticall::aggregateCall::abi_decode_returns(&output, true)
            .map_err(|e| ChainError::decode("aggregate", e))?;

        if decoded.returnData.len() != calls.len() {
            return Err(ChainError::decode(
                "aggregate",
                format!(
                    "{} results for {} calls",
                    decoded.returnData.len(),
                    calls.len()
                ),
            ));
        }
        Ok(decoded.returnData)
    }

    /// Read every call, one `aggregate` per chunk, chunks in parallel.
    #[instrument(skip(self, calls), fields(calls = calls.len(), chunk_size = self.chunk_size))]
    pub async fn aggregate(&self, calls: &[RawCall]) -> Vec<ChainResult<Bytes>> {
        let plan = chunk_plan(calls.len(), self.chunk_size);

        let chunks = plan.iter().cloned().map(|range| async move {
            let result = self.aggregate_chunk(&calls[range.clone()]).await;
            (range, result)
        });
        let resolved = join_all(chunks).await;

        let mut results: Vec<Option<ChainResult<Bytes>>> = vec![None; calls.len()];
        for (chunk, (range, outcome)) in resolved.into_iter().enumerate() {
            match outcome {
                Ok(values) => {
                    for (slot, value) in results[range].iter_mut().zip(values) {
                        *slot = Some(Ok(value));
                    }
                }
                Err(err) => {
                    warn!(chunk, start = range.start, end = range.end, error = %err, "Multicall chunk failed");
                    for slot in &mut results[range] {
                        *slot = Some(Err(err.clone()));
                    }
                }
            }
        }

        debug!(chunks = plan.len(), "Multicall complete");
        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(ChainError::ChainRead("chunk produced no result".into())))
            })
            .collect()
    }

    /// Single gas estimate for the whole batch, bypassing chunking.
    pub async fn estimate_gas(&self, calls: &[RawCall]) -> ChainResult<u64> {
        if calls.is_empty() {
            return Err(ChainError::Validation("empty batch".into()));
        }
        self.client.estimate_gas(self.aggregate_request(calls)).await
    }

    /// One private `aggregate` transaction per chunk.
    pub async fn submit_private(
        &self,
        calls: &[RawCall],
        executor: &TransactionExecutor,
    ) -> Vec<ChainResult<SubmissionOutcome>> {
        let intents = chunk_plan(calls.len(), self.chunk_size)
            .into_iter()
            .map(|range| TxIntent::new(self.multicall_address, Self::aggregate_calldata(&calls[range])))
            .collect();
        executor.submit_many(intents).await
    }

    /// Entry point covering every mode.
    pub async fn execute(
        &self,
        calls: &[RawCall],
        mode: MulticallMode<'_>,
    ) -> ChainResult<MulticallOutcome> {
        Ok(match mode {
            MulticallMode::Read => MulticallOutcome::Results(self.aggregate(calls).await),
            MulticallMode::EstimateGas => MulticallOutcome::GasEstimate(self.estimate_gas(calls).await?),
            MulticallMode::PrivateTx(executor) => {
                MulticallOutcome::Submissions(self.submit_private(calls, executor).await)
            }
        })
    }

    /// Typed read: broadcast `targets`/`calls`, batch, and decode each return.
    ///
    /// The outer error is reserved for malformed input; each element carries
    /// the outcome of its own call.
    pub async fn read<C>(
        &self,
        targets: impl Into<OneOrMany<Address>>,
        calls: impl Into<OneOrMany<C>>,
    ) -> ChainResult<Vec<ChainResult<C::Return>>>
    where
        C: SolCall + Clone,
    {
        let raw: Vec<RawCall> = normalize(targets.into(), calls.into())?
            .iter()
            .map(|(target, call)| RawCall::new(*target, call))
            .collect();

        Ok(self
            .aggregate(&raw)
            .await
            .into_iter()
            .map(|result| {
                result.and_then(|bytes| {
                    C::abi_decode_returns(&bytes, true)
                        .map_err(|e| ChainError::decode(C::SIGNATURE, e))
                })
            })
            .collect())
    }

    /// Legacy path: chunks of plain JSON-RPC `eth_call` arrays instead of the
    /// helper contract. Individual call errors stay individual.
    pub async fn eth_call_batch(
        &self,
        rpc: &JsonRpcClient,
        calls: &[RawCall],
    ) -> Vec<ChainResult<Bytes>> {
        let requests: Vec<EthCallRequest> = calls
            .iter()
            .map(|call| EthCallRequest {
                to: call.target,
                data: call.call_data.clone(),
            })
            .collect();

        let plan = chunk_plan(requests.len(), self.chunk_size);
        let chunks = plan.into_iter().map(|range| {
            let chunk = &requests[range.clone()];
            async move { (range, rpc.eth_call_batch(chunk).await) }
        });

        let mut results = Vec::with_capacity(calls.len());
        for (range, outcome) in join_all(chunks).await {
            match outcome {
                Ok(values) => results.extend(
                    values
                        .into_iter()
                        .map(|value| value.map_err(ChainError::from)),
                ),
                Err(err) => {
                    let err = ChainError::from(err);
                    results.extend(range.map(|_| Err(err.clone())));
                }
            }
        }
        results
    }
}
