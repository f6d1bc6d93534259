//! Chain interaction layer for the position sentinel.
//!
//! This crate provides:
//! - Contract bindings for the pool, data provider, oracle, multicall helper and executor
//! - Typed decoding of protocol events from raw block payloads
//! - Reserve and user configuration bitfield decoding
//! - Chunked multicall batching with order-preserving demultiplexing
//! - Nonce sequencing, gas strategies (Legacy + EIP-1559) and signing
//! - Simulate-then-broadcast transaction execution over private relays
//! - HTTP log polling into ordered block payloads
//!
//! All RPC access goes through the [`ChainClient`] trait.

pub mod contracts;
mod error;
pub mod events;
mod executor;
pub mod gas;
mod log_poller;
mod multicall;
mod nonce;
mod provider;
mod reserve_config;
mod retry;
mod signer;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ChainError, ChainResult};
pub use events::{
    decode_log, AccountRef, BlockPayload, EventKind, EventLog, InterestRateMode, LogTransaction,
    ProtocolEvent,
};
pub use executor::{RelayRoute, SubmissionOutcome, TransactionExecutor, TxIntent, DEFAULT_GAS_LIMIT};
pub use gas::{create_gas_strategy, GasParams, GasPricing, GasSettings, GasStrategy};
pub use log_poller::LogPoller;
pub use multicall::{
    chunk_plan, normalize, MulticallBatcher, MulticallMode, MulticallOutcome, OneOrMany, RawCall,
    DEFAULT_CHUNK_SIZE,
};
pub use nonce::{NonceCursor, NonceManager};
pub use provider::{BlockTag, ChainClient, HttpChainClient};
pub use reserve_config::{ReserveConfiguration, UserConfiguration};
pub use retry::RetryPolicy;
pub use signer::{LocalKeySigner, SecretStore, TransactionSigner};
