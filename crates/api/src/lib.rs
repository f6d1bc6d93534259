//! HTTP clients for services outside the chain's public RPC surface.
//!
//! This crate provides:
//! - A minimal JSON-RPC client with the legacy batched `eth_call` path
//! - Private transaction relays used to keep liquidations out of the public mempool

mod error;
mod json_rpc;
mod relay;

pub use error::RelayError;
pub use json_rpc::{EthCallRequest, JsonRpcClient};
pub use relay::{ProtectRpcRelay, PrivateTransactionRelay, TransactionRelay};
