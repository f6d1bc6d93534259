//! RPC access behind a trait.
//!
//! [`ChainClient`] is the seam between chain logic and the transport; the
//! multicall batcher, nonce cursor, gas strategies and executor only ever see
//! the trait, so tests substitute in-memory fakes. [`HttpChainClient`] is the
//! production implementation over alloy's HTTP provider, with every call
//! bounded by the configured [`RetryPolicy`].

use alloy::eips::BlockId;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log, TransactionRequest};
use alloy::transports::http::reqwest::Url;
use alloy::transports::TransportError;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::error::{ChainError, ChainResult};
use crate::retry::RetryPolicy;

/// Block a read-only call executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    /// Used for pre-broadcast simulation, so the call sees the same state the
    /// transaction would.
    Pending,
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockId::latest(),
            BlockTag::Pending => BlockId::pending(),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn block_number(&self) -> ChainResult<u64>;

    /// `eth_call`.
    async fn call(&self, tx: TransactionRequest, block: BlockTag) -> ChainResult<Bytes>;

    async fn estimate_gas(&self, tx: TransactionRequest) -> ChainResult<u64>;

    /// Pending transaction count, i.e. the next nonce the node would accept.
    async fn transaction_count(&self, address: Address) -> ChainResult<u64>;

    async fn gas_price(&self) -> ChainResult<u128>;

    async fn max_priority_fee(&self) -> ChainResult<u128>;

    /// Base fee of the latest block, `None` on chains without EIP-1559.
    async fn base_fee(&self) -> ChainResult<Option<u128>>;

    async fn get_logs(&self, filter: &Filter) -> ChainResult<Vec<Log>>;
}

fn rpc_error(err: TransportError) -> ChainError {
    match err.as_error_resp() {
        Some(payload) => ChainError::Rejected(payload.message.to_string()),
        None => ChainError::read(err),
    }
}

/// HTTP JSON-RPC client for one network.
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    url: Url,
    chain_id: u64,
    retry: RetryPolicy,
    provider: DynProvider,
}

impl HttpChainClient {
    pub fn new(rpc_url: &str, chain_id: u64, retry: RetryPolicy) -> ChainResult<Self> {
        let url = rpc_url
            .parse::<Url>()
            .map_err(|e| ChainError::Validation(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url.clone()).erased();
        Ok(Self {
            url,
            chain_id,
            retry,
            provider,
        })
    }

    /// Connect and verify the endpoint answers for the expected chain.
    pub async fn connect(rpc_url: &str, chain_id: u64, retry: RetryPolicy) -> ChainResult<Self> {
        let client = Self::new(rpc_url, chain_id, retry)?;

        let remote_chain_id = client.provider.get_chain_id().await.map_err(rpc_error)?;
        if remote_chain_id != chain_id {
            return Err(ChainError::Validation(format!(
                "endpoint reports chain {remote_chain_id}, expected {chain_id}"
            )));
        }

        let block = client.block_number().await?;
        info!(chain_id, block, "Provider connection verified");
        Ok(client)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> ChainResult<u64> {
        self.retry
            .run("block_number", || async move {
                self.provider.get_block_number().await.map_err(rpc_error)
            })
            .await
    }

    #[instrument(skip(self, tx), fields(chain_id = self.chain_id, to = ?tx.to))]
    async fn call(&self, tx: TransactionRequest, block: BlockTag) -> ChainResult<Bytes> {
        self.retry
            .run("eth_call", || {
                let tx = tx.clone();
                async move {
                    self.provider
                        .call(tx)
                        .block(block.into())
                        .await
                        .map_err(rpc_error)
                }
            })
            .await
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> ChainResult<u64> {
        self.retry
            .run("estimate_gas", || {
                let tx = tx.clone();
                async move {
                    self.provider.estimate_gas(tx).await.map_err(rpc_error)
                }
            })
            .await
    }

    async fn transaction_count(&self, address: Address) -> ChainResult<u64> {
        self.retry
            .run("transaction_count", || async move {
                self.provider
                    .get_transaction_count(address)
                    .pending()
                    .await
                    .map_err(rpc_error)
            })
            .await
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        self.retry
            .run("gas_price", || async move {
                self.provider.get_gas_price().await.map_err(rpc_error)
            })
            .await
    }

    async fn max_priority_fee(&self) -> ChainResult<u128> {
        self.retry
            .run("max_priority_fee", || async move {
                self.provider.get_max_priority_fee_per_gas().await.map_err(rpc_error)
            })
            .await
    }

    async fn base_fee(&self) -> ChainResult<Option<u128>> {
        self.retry
            .run("base_fee", || async move {
                let block = self
                    .provider
                    .get_block_by_number(BlockNumberOrTag::Latest)
                    .await
                    .map_err(rpc_error)?;
                Ok(block.and_then(|b| b.header.base_fee_per_gas.map(u128::from)))
            })
            .await
    }

    async fn get_logs(&self, filter: &Filter) -> ChainResult<Vec<Log>> {
        let logs = self
            .retry
            .run("get_logs", || async move {
                self.provider.get_logs(filter).await.map_err(rpc_error)
            })
            .await?;
        debug!(chain_id = self.chain_id, count = logs.len(), "Fetched logs");
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let err = HttpChainClient::new("not a url", 1, RetryPolicy::default()).unwrap_err();
        assert!(matches!(err, ChainError::Validation(_)));
    }

    #[test]
    fn test_new_builds_transport_without_network() {
        let client = HttpChainClient::new("http://127.0.0.1:8545", 31337, RetryPolicy::default()).unwrap();
        let cloned = client.clone();
        assert_eq!(cloned.chain_id(), 31337);
        assert_eq!(cloned.url().as_str(), "http://127.0.0.1:8545/");
    }

    #[test]
    fn test_block_tag_maps_to_block_id() {
        assert_eq!(BlockId::from(BlockTag::Pending), BlockId::pending());
        assert_eq!(BlockId::from(BlockTag::Latest), BlockId::latest());
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_connect_live() {
        let client = HttpChainClient::connect("https://eth.llamarpc.com", 1, RetryPolicy::default())
            .await
            .unwrap();
        assert!(client.block_number().await.unwrap() > 0);
    }
}
