//! Transaction construction, simulation and private broadcast.
//!
//! Every submission follows the same path: take a nonce, price gas, build the
//! request, have it signed, dry-run the exact request against the pending
//! block, and only then hand the raw bytes to the network's relay. A failed
//! simulation returns its nonce and skips the broadcast for that item alone.

use std::sync::Arc;
use std::time::Duration;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use sentinel_api::{PrivateTransactionRelay, ProtectRpcRelay, TransactionRelay};
use tracing::{info, instrument, warn};

use crate::error::{ChainError, ChainResult};
use crate::gas::GasStrategy;
use crate::nonce::NonceManager;
use crate::provider::{BlockTag, ChainClient};
use crate::signer::TransactionSigner;

/// Gas limit when the intent does not carry one.
pub const DEFAULT_GAS_LIMIT: u64 = 1_600_000;

/// Something to send: target, calldata, value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIntent {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

impl TxIntent {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Broadcast {
        tx_hash: B256,
        nonce: u64,
        relay: &'static str,
    },
    /// Dry run reverted; nothing was sent.
    SimulationFailed { nonce: u64, reason: String },
}

impl SubmissionOutcome {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast { .. })
    }
}

/// Broadcast path for a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRoute {
    /// The chain's own RPC accepts `eth_sendPrivateTransaction`.
    NativePrivate { rpc_url: String },
    /// Third-party protect endpoint.
    Protect { relay_url: String },
}

impl RelayRoute {
    pub fn for_network(native_private: bool, rpc_url: &str, protect_url: Option<&str>) -> ChainResult<Self> {
        if native_private {
            return Ok(Self::NativePrivate {
                rpc_url: rpc_url.to_string(),
            });
        }
        protect_url
            .map(|url| Self::Protect {
                relay_url: url.to_string(),
            })
            .ok_or_else(|| {
                ChainError::Validation(
                    "network has no native private relay and no protect relay url".into(),
                )
            })
    }

    pub fn into_relay(self) -> Arc<dyn TransactionRelay> {
        match self {
            Self::NativePrivate { rpc_url } => Arc::new(PrivateTransactionRelay::new(rpc_url)),
            Self::Protect { relay_url } => Arc::new(ProtectRpcRelay::new(relay_url)),
        }
    }
}

pub struct TransactionExecutor {
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn TransactionSigner>,
    nonces: Arc<NonceManager>,
    gas: Box<dyn GasStrategy>,
    relay: Arc<dyn TransactionRelay>,
    broadcast_timeout: Duration,
}

impl TransactionExecutor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TransactionSigner>,
        nonces: Arc<NonceManager>,
        gas: Box<dyn GasStrategy>,
        relay: Arc<dyn TransactionRelay>,
    ) -> Self {
        Self {
            client,
            signer,
            nonces,
            gas,
            relay,
            broadcast_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn relay_name(&self) -> &'static str {
        self.relay.name()
    }

    async fn build(&self, intent: &TxIntent, nonce: u64) -> ChainResult<TransactionRequest> {
        let params = self.gas.fetch_params(self.client.as_ref()).await?;
        let mut tx = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(intent.to)
            .with_input(intent.data.clone())
            .with_value(intent.value)
            .with_nonce(nonce)
            .with_gas_limit(intent.gas_limit.unwrap_or(DEFAULT_GAS_LIMIT))
            .with_chain_id(self.client.chain_id());
        self.gas.apply_gas(&mut tx, &params);
        Ok(tx)
    }

    async fn broadcast(&self, raw: &Bytes) -> ChainResult<B256> {
        let relay = self.relay.name();
        let block = self.client.block_number().await?;
        match tokio::time::timeout(self.broadcast_timeout, self.relay.submit(raw, block)).await {
            Ok(Ok(hash)) => Ok(hash),
            Ok(Err(err)) => Err(ChainError::Broadcast {
                relay,
                reason: err.to_string(),
            }),
            Err(_) => Err(ChainError::Timeout {
                operation: "broadcast",
                timeout_ms: self.broadcast_timeout.as_millis() as u64,
            }),
        }
    }

    /// Submit one intent. Errors are signing, pre-flight read or broadcast
    /// failures; a reverting dry run is a normal [`SubmissionOutcome`].
    #[instrument(skip(self, intent), fields(to = %intent.to, relay = self.relay.name()))]
    pub async fn submit(&self, intent: TxIntent) -> ChainResult<SubmissionOutcome> {
        let signer = self.signer.address();
        let nonce = self.nonces.acquire(self.client.as_ref(), signer).await?;

        let prepared = async {
            let tx = self.build(&intent, nonce).await?;
            let raw = self.signer.sign_transaction(tx.clone()).await?;
            Ok::<_, ChainError>((tx, raw))
        }
        .await;
        let (tx, raw) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.nonces.release(signer, nonce).await;
                return Err(err);
            }
        };

        if let Err(err) = self.client.call(tx, BlockTag::Pending).await {
            warn!(nonce, error = %err, "Simulation failed, skipping broadcast");
            self.nonces.release(signer, nonce).await;
            return Ok(SubmissionOutcome::SimulationFailed {
                nonce,
                reason: err.to_string(),
            });
        }

        match self.broadcast(&raw).await {
            Ok(tx_hash) => {
                info!(%tx_hash, nonce, "Transaction broadcast");
                Ok(SubmissionOutcome::Broadcast {
                    tx_hash,
                    nonce,
                    relay: self.relay.name(),
                })
            }
            Err(err) => {
                self.nonces.release(signer, nonce).await;
                Err(err)
            }
        }
    }

    /// Submit intents one after another. Each item's failure is reported in
    /// its own slot and never stops the rest.
    pub async fn submit_many(&self, intents: Vec<TxIntent>) -> Vec<ChainResult<SubmissionOutcome>> {
        let mut outcomes = Vec::with_capacity(intents.len());
        for intent in intents {
            outcomes.push(self.submit(intent).await);
        }
        outcomes
    }
}
