//! Private transaction relays.
//!
//! Liquidation transactions must not sit in the public pending pool before
//! inclusion. Chains whose RPC exposes a native private submission method use
//! [`PrivateTransactionRelay`]; every other chain goes through a third-party
//! protect endpoint via [`ProtectRpcRelay`].

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::RelayError;
use crate::json_rpc::JsonRpcClient;

/// Number of blocks a private transaction stays eligible for inclusion.
const PRIVATE_TX_BLOCK_WINDOW: u64 = 25;

/// A submission path for signed raw transactions.
#[async_trait]
pub trait TransactionRelay: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Submit a signed, EIP-2718 encoded transaction. Returns its hash.
    async fn submit(&self, raw: &Bytes, current_block: u64) -> Result<B256, RelayError>;
}

fn raw_hex(raw: &Bytes) -> String {
    format!("0x{}", hex::encode(raw))
}

/// Native private submission through the chain RPC (`eth_sendPrivateTransaction`).
#[derive(Debug, Clone)]
pub struct PrivateTransactionRelay {
    rpc: JsonRpcClient,
}

impl PrivateTransactionRelay {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc: JsonRpcClient::new(rpc_url),
        }
    }
}

#[async_trait]
impl TransactionRelay for PrivateTransactionRelay {
    fn name(&self) -> &'static str {
        "native-private"
    }

    #[instrument(skip(self, raw), fields(relay = self.name(), url = %self.rpc.url()))]
    async fn submit(&self, raw: &Bytes, current_block: u64) -> Result<B256, RelayError> {
        let max_block = current_block + PRIVATE_TX_BLOCK_WINDOW;
        let params = json!([{
            "tx": raw_hex(raw),
            "maxBlockNumber": format!("{max_block:#x}"),
            "preferences": { "fast": true }
        }]);

        let hash: B256 = self.rpc.request("eth_sendPrivateTransaction", params).await?;
        info!(tx_hash = %hash, max_block, "Private transaction accepted");
        Ok(hash)
    }
}

/// Third-party anti-front-running endpoint speaking plain `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct ProtectRpcRelay {
    rpc: JsonRpcClient,
}

impl ProtectRpcRelay {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            rpc: JsonRpcClient::new(relay_url),
        }
    }
}

#[async_trait]
impl TransactionRelay for ProtectRpcRelay {
    fn name(&self) -> &'static str {
        "protect-rpc"
    }

    #[instrument(skip(self, raw), fields(relay = self.name(), url = %self.rpc.url()))]
    async fn submit(&self, raw: &Bytes, _current_block: u64) -> Result<B256, RelayError> {
        let hash: B256 = self
            .rpc
            .request("eth_sendRawTransaction", json!([raw_hex(raw)]))
            .await?;
        info!(tx_hash = %hash, "Transaction accepted by protect relay");
        Ok(hash)
    }
}
